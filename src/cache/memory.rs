//! Bounded in-memory cacher.
//!
//! Keeps structural query results in an LRU map. Any write invalidates the
//! whole map: a statement only names its own table, and cached reads may
//! join others.

use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use serde_json::Value;

use super::cacher::Cacher;
use super::error::CacheError;
use super::lock;
use super::query::Query;
use super::statement::Statement;

const METRIC_MEMORY_EVICT: &str = "easecache_memory_evict_total";

pub struct MemoryCacher {
    entries: RwLock<LruCache<String, Query<Value>>>,
}

impl MemoryCacher {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        lock::read(&self.entries, "memory.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock::write(&self.entries, "memory.clear").clear();
    }
}

#[async_trait]
impl Cacher for MemoryCacher {
    async fn get(
        &self,
        _statement: &Statement,
        key: &str,
    ) -> Result<Option<Query<Value>>, CacheError> {
        // LRU lookups reorder entries, so reads take the write lock.
        Ok(lock::write(&self.entries, "memory.get").get(key).cloned())
    }

    async fn store(
        &self,
        _statement: &Statement,
        key: &str,
        query: &Query<Value>,
    ) -> Result<(), CacheError> {
        let evicted = lock::write(&self.entries, "memory.store").push(key.to_owned(), query.clone());
        if matches!(evicted, Some((evicted_key, _)) if evicted_key != key) {
            counter!(METRIC_MEMORY_EVICT).increment(1);
        }
        Ok(())
    }

    async fn invalidate(&self, _statement: &Statement) -> Result<(), CacheError> {
        self.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use serde_json::json;

    use super::*;
    use crate::cache::statement::EntityType;

    struct User;

    fn users() -> Statement {
        Statement::new("users", EntityType::of::<User>()).sql("SELECT * FROM users")
    }

    fn capacity(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("non-zero capacity")
    }

    #[tokio::test]
    async fn store_then_get_returns_equal_result() {
        let cacher = MemoryCacher::new(capacity(4));
        let query = Query::with_rows(json!([{"id": 1, "name": "ada"}]), 1);

        assert!(cacher.get(&users(), "k").await.expect("get").is_none());
        cacher.store(&users(), "k", &query).await.expect("store");

        let cached = cacher.get(&users(), "k").await.expect("get");
        assert_eq!(cached, Some(query));
    }

    #[tokio::test]
    async fn nested_payload_survives_the_round_trip() {
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Profile {
            name: String,
            tags: Vec<String>,
            scores: std::collections::BTreeMap<String, Vec<u32>>,
        }

        let profile = Profile {
            name: "ada".to_string(),
            tags: vec!["admin".to_string(), "author".to_string()],
            scores: [("2024".to_string(), vec![3, 1, 4])].into_iter().collect(),
        };
        let original = Query::with_rows(vec![profile], 1);
        let cacher = MemoryCacher::new(capacity(4));

        let structural = original.to_structural().expect("encodes");
        cacher.store(&users(), "profiles", &structural).await.expect("store");
        let cached = cacher
            .get(&users(), "profiles")
            .await
            .expect("get")
            .expect("hit");

        let mut restored = Query::<Vec<Profile>>::empty();
        restored.copy_from(&cached).expect("shape fits");
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let cacher = MemoryCacher::new(capacity(2));
        let query = Query::with_rows(json!(1), 1);

        cacher.store(&users(), "a", &query).await.expect("store a");
        cacher.store(&users(), "b", &query).await.expect("store b");
        assert!(cacher.get(&users(), "a").await.expect("get a").is_some());
        cacher.store(&users(), "c", &query).await.expect("store c");

        assert_eq!(cacher.len(), 2);
        assert!(cacher.get(&users(), "b").await.expect("get b").is_none());
        assert!(cacher.get(&users(), "a").await.expect("get a").is_some());
    }

    #[tokio::test]
    async fn invalidate_clears_every_entry() {
        let cacher = MemoryCacher::new(capacity(8));
        let query = Query::with_rows(json!(null), 0);
        cacher.store(&users(), "a", &query).await.expect("store a");
        cacher.store(&users(), "b", &query).await.expect("store b");

        cacher.invalidate(&users()).await.expect("invalidate");

        assert!(cacher.is_empty());
    }

    #[tokio::test]
    async fn recovers_from_poisoned_lock() {
        let cacher = MemoryCacher::new(capacity(2));

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = cacher.entries.write().expect("lock acquired");
            panic!("poison cacher lock");
        }));

        let query = Query::with_rows(json!("value"), 1);
        cacher.store(&users(), "k", &query).await.expect("store");
        assert_eq!(cacher.len(), 1);
    }
}
