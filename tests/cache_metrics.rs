use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use easecache::cache::{
    CacheError, Cacher, Caches, CachesConfig, Easer, EntityType, MemoryCacher, Query, Statement,
    TableRule,
};
use easecache::infra::telemetry;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::Value;

struct Account;

struct OfflineCacher;

#[async_trait]
impl Cacher for OfflineCacher {
    async fn get(&self, _: &Statement, _: &str) -> Result<Option<Query<Value>>, CacheError> {
        Err(CacheError::Unavailable("offline".to_string()))
    }

    async fn store(&self, _: &Statement, _: &str, _: &Query<Value>) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("offline".to_string()))
    }

    async fn invalidate(&self, _: &Statement) -> Result<(), CacheError> {
        Ok(())
    }
}

fn account(id: u64) -> Statement {
    Statement::new("accounts", EntityType::of::<Account>())
        .sql("SELECT * FROM accounts WHERE id = ?")
        .bind(id)
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Hit, miss, eviction, eligibility evaluation, coalescing leader
    let memory = Arc::new(MemoryCacher::new(std::num::NonZeroUsize::MIN));
    let caches = Caches::new(
        CachesConfig::default()
            .with_easer(true)
            .with_cacher(memory)
            .with_cacheable_tables(vec![TableRule::pattern("^accounts$").expect("pattern")]),
    );
    for id in [1, 1, 2] {
        let outcome = caches
            .query(&account(id), || async move { Ok(Query::with_rows(id, 1)) })
            .await;
        assert!(outcome.result.is_ok());
    }

    // Recorded cache-layer error
    let degraded = Caches::new(CachesConfig::default().with_cacher(Arc::new(OfflineCacher)));
    let outcome = degraded
        .query(&account(3), || async { Ok(Query::with_rows(3_u64, 1)) })
        .await;
    assert!(outcome.is_degraded());

    // Follower plus abandoned leader
    let easer = Arc::new(Easer::<u32>::new());
    let leader = {
        let easer = Arc::clone(&easer);
        tokio::spawn(async move {
            easer
                .execute("slow", || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    0
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let follower = {
        let easer = Arc::clone(&easer);
        tokio::spawn(async move { easer.execute("slow", || async { 7 }).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    leader.abort();
    let recovered = tokio::time::timeout(Duration::from_secs(5), follower)
        .await
        .expect("follower finishes after leader abort")
        .expect("follower task succeeds");
    assert_eq!(recovered, 7);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "easecache_cache_hit_total",
        "easecache_cache_miss_total",
        "easecache_cache_error_total",
        "easecache_easer_leader_total",
        "easecache_easer_follower_total",
        "easecache_easer_abandoned_total",
        "easecache_eligibility_evaluation_total",
        "easecache_memory_evict_total",
        "easecache_query_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
