use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::comments::METRIC_CREATED;
use crate::application::comments::moderation::METRIC_RATE_LIMITED;
use crate::application::comments::notify::{METRIC_DROPPED, METRIC_FAILED};
use crate::application::render::{METRIC_EVICT, METRIC_HIT, METRIC_MISS};
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT,
            Unit::Count,
            "Render cache hits, labelled by cache."
        );
        describe_counter!(
            METRIC_MISS,
            Unit::Count,
            "Render cache misses, labelled by cache."
        );
        describe_counter!(
            METRIC_EVICT,
            Unit::Count,
            "Render cache evictions due to capacity, labelled by cache."
        );
        describe_counter!(
            METRIC_RATE_LIMITED,
            Unit::Count,
            "Comment submissions refused by the per-IP rate limit."
        );
        describe_counter!(
            METRIC_CREATED,
            Unit::Count,
            "Comments stored, labelled by resulting status."
        );
        describe_counter!(
            METRIC_DROPPED,
            Unit::Count,
            "Notification jobs dropped before running, labelled by channel and reason."
        );
        describe_counter!(
            METRIC_FAILED,
            Unit::Count,
            "Notification jobs that ran and failed, labelled by channel."
        );
    });
}
