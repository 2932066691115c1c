//! Statement descriptors handed to the interception layer.
//!
//! A [`Statement`] is always fully populated by the caller before it reaches
//! the cache layer: table name, entity type, compiled SQL and bound values.

use std::any::{TypeId, type_name};
use std::fmt;

use serde_json::Value;

/// Identity of the entity (model) type a statement reads or writes.
///
/// Equality is by [`TypeId`]; the name is only used for keys and logs.
#[derive(Clone, Copy)]
pub struct EntityType {
    id: TypeId,
    name: &'static str,
}

impl EntityType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityType {}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Pipeline stage intercepted by [`Caches`](super::Caches).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Query)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending data-access operation as seen by the cache layer.
#[derive(Debug, Clone)]
pub struct Statement {
    table: String,
    entity: EntityType,
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(table: impl Into<String>, entity: EntityType) -> Self {
        Self {
            table: table.into(),
            entity,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the compiled query text.
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }

    /// Append a bound parameter value.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    pub fn query_text(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct User;
    struct Order;

    #[test]
    fn entity_types_compare_by_identity() {
        assert_eq!(EntityType::of::<User>(), EntityType::of::<User>());
        assert_ne!(EntityType::of::<User>(), EntityType::of::<Order>());
        assert!(EntityType::of::<User>().name().ends_with("User"));
    }

    #[test]
    fn builder_collects_params_in_order() {
        let statement = Statement::new("users", EntityType::of::<User>())
            .sql("SELECT * FROM users WHERE id = $1 AND name = $2")
            .bind(7)
            .bind("ada");

        assert_eq!(statement.table(), "users");
        assert_eq!(statement.params(), &[Value::from(7), Value::from("ada")]);
    }

    #[test]
    fn only_query_is_not_a_mutation() {
        assert!(!Operation::Query.is_mutation());
        assert!(Operation::Create.is_mutation());
        assert!(Operation::Update.is_mutation());
        assert!(Operation::Delete.is_mutation());
        assert_eq!(Operation::Delete.to_string(), "delete");
    }
}
