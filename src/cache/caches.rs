//! Interception layer around the host pipeline's read and write hooks.
//!
//! Reads go identifier → cache lookup → coalesced execution → write-back.
//! Writes invalidate the cacher and then execute. Failures of the cache
//! layer are recorded on the [`Outcome`] and never replace the result of the
//! underlying execution.

use std::fmt;
use std::future::Future;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, instrument, warn};

use super::cacher::Cacher;
use super::config::CachesConfig;
use super::easer::Easer;
use super::eligibility::Eligibility;
use super::error::{CacheError, CacheLayerError, ExecutionError};
use super::identifier;
use super::query::{Payload, Query, SharedQuery};
use super::statement::{Operation, Statement};

pub const NAME: &str = "easecache:caches";

const METRIC_CACHE_HIT: &str = "easecache_cache_hit_total";
const METRIC_CACHE_MISS: &str = "easecache_cache_miss_total";
const METRIC_CACHE_ERROR: &str = "easecache_cache_error_total";
const METRIC_QUERY_MS: &str = "easecache_query_ms";

type Eased = Result<SharedQuery, ExecutionError>;

/// Result of an intercepted operation.
///
/// `result` only ever carries the execution's own error; cache-layer
/// failures are collected in `cache_errors`.
#[derive(Debug)]
pub struct Outcome<T> {
    pub result: Result<T, ExecutionError>,
    pub cache_errors: Vec<CacheLayerError>,
}

impl<T> Outcome<T> {
    fn new(result: Result<T, ExecutionError>, cache_errors: Vec<CacheLayerError>) -> Self {
        Self {
            result,
            cache_errors,
        }
    }

    /// True when the cache layer recorded at least one failure.
    pub fn is_degraded(&self) -> bool {
        !self.cache_errors.is_empty()
    }

    pub fn into_result(self) -> Result<T, ExecutionError> {
        self.result
    }
}

/// Caching and coalescing decorator for a data-access pipeline.
pub struct Caches {
    config: CachesConfig,
    eligibility: Eligibility,
    easer: Option<Easer<Eased>>,
}

impl Caches {
    pub fn new(config: CachesConfig) -> Self {
        let eligibility = Eligibility::new(config.cacheable_tables.clone());
        let easer = config.easer.then(Easer::new);
        Self {
            config,
            eligibility,
            easer,
        }
    }

    pub fn name(&self) -> &'static str {
        NAME
    }

    pub fn config(&self) -> &CachesConfig {
        &self.config
    }

    pub fn eligibility(&self) -> &Eligibility {
        &self.eligibility
    }

    /// Reads currently coalesced; zero when coalescing is disabled.
    pub fn in_flight_count(&self) -> usize {
        self.easer.as_ref().map_or(0, Easer::in_flight_count)
    }

    /// Read hook.
    ///
    /// `execute` runs the real read. It is skipped on a cache hit and shared
    /// with concurrent identical reads when coalescing is enabled.
    #[instrument(skip_all, fields(table = statement.table()))]
    pub async fn query<D, F, Fut>(&self, statement: &Statement, execute: F) -> Outcome<Query<D>>
    where
        D: Payload,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Query<D>, ExecutionError>>,
    {
        let mut cache_errors = Vec::new();
        if !self.config.is_active() {
            return Outcome::new(execute().await, cache_errors);
        }

        let started_at = Instant::now();
        let identifier = identifier::build(statement);
        let cacher = self
            .config
            .cacher
            .as_deref()
            .filter(|_| {
                self.eligibility
                    .is_cacheable(statement.table(), statement.entity())
            });

        if let Some(cacher) = cacher {
            if let Some(hit) = check_cache(cacher, statement, &identifier, &mut cache_errors).await
            {
                histogram!(METRIC_QUERY_MS, "path" => "hit")
                    .record(started_at.elapsed().as_secs_f64() * 1000.0);
                return Outcome::new(Ok(hit), cache_errors);
            }
        }

        let result = self
            .ease(statement, &identifier, cacher, execute, &mut cache_errors)
            .await;
        histogram!(METRIC_QUERY_MS, "path" => "execute")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        Outcome::new(result, cache_errors)
    }

    pub async fn create<T, F, Fut>(&self, statement: &Statement, execute: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        self.mutate(Operation::Create, statement, execute).await
    }

    pub async fn update<T, F, Fut>(&self, statement: &Statement, execute: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        self.mutate(Operation::Update, statement, execute).await
    }

    pub async fn delete<T, F, Fut>(&self, statement: &Statement, execute: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        self.mutate(Operation::Delete, statement, execute).await
    }

    /// Write hook: invalidate, then execute regardless of the invalidation
    /// outcome.
    ///
    /// `Operation::Query` is refused without running `execute`; reads go
    /// through [`Caches::query`].
    #[instrument(skip_all, fields(operation = %operation, table = statement.table()))]
    pub async fn mutate<T, F, Fut>(
        &self,
        operation: Operation,
        statement: &Statement,
        execute: F,
    ) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        if !operation.is_mutation() {
            warn!(%operation, "refusing non-write operation on the write hook");
            return Outcome::new(
                Err(ExecutionError::message(format!(
                    "`{operation}` is not a write operation"
                ))),
                Vec::new(),
            );
        }

        let mut cache_errors = Vec::new();
        if let Some(cacher) = self.config.cacher.as_deref() {
            if let Err(source) = cacher.invalidate(statement).await {
                record(
                    &mut cache_errors,
                    CacheLayerError::Invalidate {
                        table: statement.table().to_owned(),
                        source,
                    },
                );
            }
        }

        Outcome::new(execute().await, cache_errors)
    }

    async fn ease<D, F, Fut>(
        &self,
        statement: &Statement,
        identifier: &str,
        cacher: Option<&dyn Cacher>,
        execute: F,
        cache_errors: &mut Vec<CacheLayerError>,
    ) -> Result<Query<D>, ExecutionError>
    where
        D: Payload,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Query<D>, ExecutionError>>,
    {
        let Some(easer) = &self.easer else {
            let query = execute().await?;
            if let Some(cacher) = cacher {
                store_in_cache(cacher, statement, identifier, &query, cache_errors).await;
            }
            return Ok(query);
        };

        // Only the leader runs this, so one execution means one write-back.
        let mut leader_errors = Vec::new();
        let errors = &mut leader_errors;
        let shared = easer
            .execute(identifier, move || async move {
                let query = execute().await?;
                if let Some(cacher) = cacher {
                    store_in_cache(cacher, statement, identifier, &query, errors).await;
                }
                Ok::<SharedQuery, ExecutionError>(query.into_shared())
            })
            .await;
        cache_errors.append(&mut leader_errors);

        let (query, copy_error) = Query::detach(shared?);
        if let Some(source) = copy_error {
            record(
                cache_errors,
                CacheLayerError::Copy {
                    identifier: identifier.to_owned(),
                    source,
                },
            );
        }
        Ok(query)
    }
}

impl fmt::Debug for Caches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caches")
            .field("config", &self.config)
            .field("eligibility", &self.eligibility)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

async fn check_cache<D: Payload>(
    cacher: &dyn Cacher,
    statement: &Statement,
    identifier: &str,
    cache_errors: &mut Vec<CacheLayerError>,
) -> Option<Query<D>> {
    match cacher.get(statement, identifier).await {
        Ok(Some(cached)) => {
            let mut query = Query::empty();
            match query.copy_from(&cached) {
                Ok(()) => {
                    counter!(METRIC_CACHE_HIT).increment(1);
                    debug!(identifier, "served from cache");
                    return Some(query);
                }
                Err(source) => record(
                    cache_errors,
                    CacheLayerError::Copy {
                        identifier: identifier.to_owned(),
                        source,
                    },
                ),
            }
        }
        Ok(None) => {}
        Err(source) => record(
            cache_errors,
            CacheLayerError::Fetch {
                identifier: identifier.to_owned(),
                source,
            },
        ),
    }

    counter!(METRIC_CACHE_MISS).increment(1);
    debug!(identifier, "cache miss");
    None
}

async fn store_in_cache<D: Payload>(
    cacher: &dyn Cacher,
    statement: &Statement,
    identifier: &str,
    query: &Query<D>,
    cache_errors: &mut Vec<CacheLayerError>,
) {
    let stored = match query.to_structural() {
        Ok(structural) => cacher.store(statement, identifier, &structural).await,
        Err(error) => Err(CacheError::Encode(error.to_string())),
    };

    if let Err(source) = stored {
        record(
            cache_errors,
            CacheLayerError::Store {
                identifier: identifier.to_owned(),
                source,
            },
        );
    }
}

fn record(cache_errors: &mut Vec<CacheLayerError>, error: CacheLayerError) {
    let stage = error.stage();
    counter!(METRIC_CACHE_ERROR, "stage" => stage).increment(1);
    warn!(stage, error = %error, "cache layer degraded");
    cache_errors.push(error);
}
