use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache layer emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "easecache_cache_hit_total",
            Unit::Count,
            "Reads answered from the cacher without executing."
        );
        describe_counter!(
            "easecache_cache_miss_total",
            Unit::Count,
            "Reads the cacher could not answer."
        );
        describe_counter!(
            "easecache_cache_error_total",
            Unit::Count,
            "Cache-layer failures recorded instead of failing the request, by stage."
        );
        describe_counter!(
            "easecache_easer_leader_total",
            Unit::Count,
            "Coalesced executions actually run."
        );
        describe_counter!(
            "easecache_easer_follower_total",
            Unit::Count,
            "Reads that attached to an in-flight execution."
        );
        describe_counter!(
            "easecache_easer_abandoned_total",
            Unit::Count,
            "Leaders dropped before publishing an outcome."
        );
        describe_counter!(
            "easecache_eligibility_evaluation_total",
            Unit::Count,
            "Rule evaluations not served from the decision memo."
        );
        describe_counter!(
            "easecache_memory_evict_total",
            Unit::Count,
            "In-memory cacher evictions due to capacity."
        );
        describe_histogram!(
            "easecache_query_ms",
            Unit::Milliseconds,
            "Intercepted read latency in milliseconds."
        );
    });
}
