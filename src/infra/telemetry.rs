use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CLEANUP_DELETED, METRIC_COMBINATION_CREATED, METRIC_COMBINATION_HIT,
    METRIC_COMBINATION_MS, METRIC_RACE_EXHAUSTED, METRIC_RACE_RETRY,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Events go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(true)
            .boxed(),
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

/// Register metric descriptions with the installed recorder. Runs once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_COMBINATION_CREATED,
            Unit::Count,
            "Total number of combinations written to the store."
        );
        describe_counter!(
            METRIC_COMBINATION_HIT,
            Unit::Count,
            "Total number of queries served from an existing combination."
        );
        describe_histogram!(
            METRIC_COMBINATION_MS,
            Unit::Milliseconds,
            "Combination write latency in milliseconds."
        );
        describe_counter!(
            METRIC_CLEANUP_DELETED,
            Unit::Count,
            "Total number of ephemeral combinations deleted after use."
        );
        describe_counter!(
            METRIC_RACE_RETRY,
            Unit::Count,
            "Total number of range reads retried after an empty combined result."
        );
        describe_counter!(
            METRIC_RACE_EXHAUSTED,
            Unit::Count,
            "Total number of range reads that stayed empty after all retries."
        );
    });
}
