//! Request coalescing ("easing") for concurrent identical reads.
//!
//! The first caller for an identifier becomes the leader and runs the work;
//! callers arriving while it is in flight attach to the same slot and wait for
//! the published outcome. Nothing is retained after the slot is removed, so
//! sequential callers always execute again.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, warn};

const METRIC_EASER_LEADER: &str = "easecache_easer_leader_total";
const METRIC_EASER_FOLLOWER: &str = "easecache_easer_follower_total";
const METRIC_EASER_ABANDONED: &str = "easecache_easer_abandoned_total";

struct Slot<T> {
    generation: u64,
    outcome: watch::Receiver<Option<T>>,
}

enum Role<'a, T> {
    Leader(LeaderGuard<'a, T>),
    Follower(watch::Receiver<Option<T>>),
}

/// Coalesces concurrent executions that share an identifier.
pub struct Easer<T> {
    in_flight: DashMap<String, Slot<T>>,
    generations: AtomicU64,
}

impl<T> Easer<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Run `work` at most once among the callers currently sharing `identifier`.
    ///
    /// Every caller receives a clone of the leader's outcome. If the leader is
    /// dropped before publishing, waiting followers retry and one of them leads.
    pub async fn execute<F, Fut>(&self, identifier: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            match self.join(identifier) {
                Role::Leader(guard) => {
                    counter!(METRIC_EASER_LEADER).increment(1);
                    let outcome = work().await;
                    guard.publish(outcome.clone());
                    return outcome;
                }
                Role::Follower(mut outcome) => {
                    counter!(METRIC_EASER_FOLLOWER).increment(1);
                    debug!(identifier, "attached to in-flight execution");
                    if let Some(outcome) = wait_for_outcome(&mut outcome).await {
                        return outcome;
                    }
                    warn!(identifier, "in-flight leader abandoned, retrying");
                }
            }
        }
    }

    /// Number of identifiers currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn join(&self, identifier: &str) -> Role<'_, T> {
        match self.in_flight.entry(identifier.to_owned()) {
            Entry::Occupied(occupied) => Role::Follower(occupied.get().outcome.clone()),
            Entry::Vacant(vacant) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let (sender, outcome) = watch::channel(None);
                vacant.insert(Slot {
                    generation,
                    outcome,
                });
                Role::Leader(LeaderGuard {
                    identifier: identifier.to_owned(),
                    generation,
                    sender,
                    in_flight: &self.in_flight,
                    published: false,
                })
            }
        }
    }
}

impl<T> Default for Easer<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_outcome<T: Clone>(outcome: &mut watch::Receiver<Option<T>>) -> Option<T> {
    match outcome.wait_for(Option::is_some).await {
        Ok(published) => Option::clone(&published),
        // Sender dropped without publishing.
        Err(_) => None,
    }
}

/// Registry slot owned by the leader; released on publish or on drop.
struct LeaderGuard<'a, T> {
    identifier: String,
    generation: u64,
    sender: watch::Sender<Option<T>>,
    in_flight: &'a DashMap<String, Slot<T>>,
    published: bool,
}

impl<T> LeaderGuard<'_, T> {
    fn publish(mut self, outcome: T) {
        self.release(Some(outcome));
        self.published = true;
    }

    /// Publish (if given) and remove the slot under one shard lock, so no
    /// caller can attach between the two steps.
    fn release(&self, outcome: Option<T>) {
        let entry = self.in_flight.entry(self.identifier.clone());
        if let Some(outcome) = outcome {
            self.sender.send_replace(Some(outcome));
        }
        if let Entry::Occupied(slot) = entry {
            if slot.get().generation == self.generation {
                slot.remove();
            }
        }
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.published {
            counter!(METRIC_EASER_ABANDONED).increment(1);
            self.release(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    #[tokio::test]
    async fn single_call_runs_work() {
        let easer: Easer<Result<i32, String>> = Easer::new();

        let result = easer.execute("key", || async { Ok(42) }).await;

        assert_eq!(result, Ok(42));
        assert_eq!(easer.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_same_identifier_runs_once() {
        let easer: Arc<Easer<Result<i32, String>>> = Arc::new(Easer::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let easer = Arc::clone(&easer);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                easer
                    .execute("same", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.expect("task joins"), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(easer.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn different_identifiers_do_not_share_work() {
        let easer: Arc<Easer<Result<usize, String>>> = Arc::new(Easer::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for i in 0..4 {
            let easer = Arc::clone(&easer);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                easer
                    .execute(&format!("key-{i}"), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(30)).await;
                        Ok(i)
                    })
                    .await
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.expect("task joins"), Ok(i));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn sequential_calls_execute_again() {
        let easer: Easer<Result<i32, String>> = Easer::new();

        assert_eq!(easer.execute("key", || async { Ok(1) }).await, Ok(1));
        assert_eq!(easer.execute("key", || async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn errors_reach_every_caller_and_free_the_slot() {
        let easer: Arc<Easer<Result<i32, String>>> = Arc::new(Easer::new());

        let mut handles = vec![];
        for _ in 0..3 {
            let easer = Arc::clone(&easer);
            handles.push(tokio::spawn(async move {
                easer
                    .execute("failing", || async {
                        sleep(Duration::from_millis(40)).await;
                        Err("store offline".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(
                handle.await.expect("task joins"),
                Err("store offline".to_string())
            );
        }
        assert_eq!(easer.in_flight_count(), 0);

        let retried = easer.execute("failing", || async { Ok(5) }).await;
        assert_eq!(retried, Ok(5));
    }

    #[tokio::test]
    async fn cancelled_leader_releases_followers() {
        let easer: Arc<Easer<Result<i32, String>>> = Arc::new(Easer::new());

        let leader = {
            let easer = Arc::clone(&easer);
            tokio::spawn(async move {
                easer
                    .execute("slow", || async {
                        sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(20)).await;
        assert_eq!(easer.in_flight_count(), 1);

        let follower = {
            let easer = Arc::clone(&easer);
            tokio::spawn(async move { easer.execute("slow", || async { Ok(2) }).await })
        };
        sleep(Duration::from_millis(20)).await;

        leader.abort();
        assert!(leader.await.is_err());

        let result = tokio::time::timeout(Duration::from_secs(5), follower)
            .await
            .expect("follower is not stuck")
            .expect("task joins");
        assert_eq!(result, Ok(2));
        assert_eq!(easer.in_flight_count(), 0);
    }
}
