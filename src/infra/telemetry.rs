use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::*;
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

/// Register descriptions for every catalog cache metric. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(METRIC_L1_HIT, Unit::Count, "Reads answered by the in-process tier.");
        describe_counter!(METRIC_L1_MISS, Unit::Count, "Reads the in-process tier could not answer.");
        describe_counter!(
            METRIC_L1_EVICT,
            Unit::Count,
            "In-process entries evicted due to capacity."
        );
        describe_counter!(METRIC_L2_HIT, Unit::Count, "Reads answered by the distributed tier.");
        describe_counter!(
            METRIC_L2_MISS,
            Unit::Count,
            "Reads the distributed tier could not answer."
        );
        describe_counter!(
            METRIC_L2_ERROR,
            Unit::Count,
            "Distributed tier calls that failed or timed out."
        );
        describe_counter!(METRIC_ORIGIN_LOAD, Unit::Count, "Loads issued against the origin store.");
        describe_histogram!(
            METRIC_ORIGIN_LOAD_MS,
            Unit::Milliseconds,
            "Origin load latency in milliseconds."
        );
        describe_counter!(
            METRIC_COALESCED,
            Unit::Count,
            "Callers that joined an origin load already in flight."
        );
        describe_counter!(
            METRIC_STALE_WRITE_REJECTED,
            Unit::Count,
            "Write-backs dropped because an invalidation raced the load."
        );
        describe_counter!(METRIC_INVALIDATION, Unit::Count, "Invalidations executed.");
        describe_histogram!(
            METRIC_INVALIDATION_MS,
            Unit::Milliseconds,
            "Invalidation latency in milliseconds."
        );
    });
}
