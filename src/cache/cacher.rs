//! Pluggable cache backend port.

use async_trait::async_trait;
use serde_json::Value;

use super::error::CacheError;
use super::query::Query;
use super::statement::Statement;

/// Key/value store for query results.
///
/// Payloads cross this port in structural form; the interception layer
/// restores the caller's destination shape. Persistence, expiry and eviction
/// belong to the implementation.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Look up a result. A miss is `Ok(None)`, never an error.
    async fn get(&self, statement: &Statement, key: &str)
    -> Result<Option<Query<Value>>, CacheError>;

    /// Store a result under `key`.
    async fn store(
        &self,
        statement: &Statement,
        key: &str,
        query: &Query<Value>,
    ) -> Result<(), CacheError>;

    /// Drop cached results affected by a write to `statement`'s table.
    async fn invalidate(&self, statement: &Statement) -> Result<(), CacheError>;
}
