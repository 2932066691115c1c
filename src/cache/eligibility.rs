//! Memoized per-table cacheability decisions.
//!
//! Rules are configuration and never change after startup, so each
//! `table:entity` verdict is computed once and then served from the map.

use std::fmt;

use dashmap::DashMap;
use metrics::counter;
use regex::Regex;
use tracing::debug;

use super::statement::EntityType;

const METRIC_ELIGIBILITY_EVALUATION: &str = "easecache_eligibility_evaluation_total";

/// One entry of the cacheable-tables rule set.
#[derive(Clone)]
pub enum TableRule {
    /// Regular expression matched against the table name.
    Pattern(Regex),
    /// Entity type compared by identity.
    Entity(EntityType),
}

impl TableRule {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    pub fn entity<T: 'static>() -> Self {
        Self::Entity(EntityType::of::<T>())
    }

    fn matches(&self, table: &str, entity: &EntityType) -> bool {
        match self {
            Self::Pattern(pattern) => pattern.is_match(table),
            Self::Entity(candidate) => candidate == entity,
        }
    }
}

impl fmt::Debug for TableRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.as_str()).finish(),
            Self::Entity(entity) => f.debug_tuple("Entity").field(entity).finish(),
        }
    }
}

/// Decides whether a table/entity pair may be served from the cache.
pub struct Eligibility {
    rules: Vec<TableRule>,
    decisions: DashMap<String, bool>,
}

impl Eligibility {
    pub fn new(rules: Vec<TableRule>) -> Self {
        Self {
            rules,
            decisions: DashMap::new(),
        }
    }

    pub fn rules(&self) -> &[TableRule] {
        &self.rules
    }

    /// An empty rule set caches everything; an unknown (empty) table name is
    /// cacheable. Otherwise the first matching rule makes the pair cacheable.
    pub fn is_cacheable(&self, table: &str, entity: &EntityType) -> bool {
        if self.rules.is_empty() || table.is_empty() {
            return true;
        }

        let key = format!("{table}:{}", entity.name());
        if let Some(verdict) = self.decisions.get(&key) {
            return *verdict;
        }

        let verdict = self.evaluate(table, entity);
        debug!(table, entity = entity.name(), verdict, "cacheability decided");
        self.decisions.insert(key, verdict);
        verdict
    }

    /// Number of memoized decisions.
    pub fn decisions_len(&self) -> usize {
        self.decisions.len()
    }

    fn evaluate(&self, table: &str, entity: &EntityType) -> bool {
        counter!(METRIC_ELIGIBILITY_EVALUATION).increment(1);
        self.rules.iter().any(|rule| rule.matches(table, entity))
    }
}

impl fmt::Debug for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eligibility")
            .field("rules", &self.rules)
            .field("decisions", &self.decisions.len())
            .finish()
    }
}
