use std::sync::Once;

use metrics::{Unit, describe_counter};
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quaderno_page_cache_hit_total",
            Unit::Count,
            "Total number of page-cache hits on the global feed."
        );
        describe_counter!(
            "quaderno_page_cache_miss_total",
            Unit::Count,
            "Total number of page-cache misses on the global feed."
        );
        describe_counter!(
            "quaderno_page_cache_store_total",
            Unit::Count,
            "Total number of responses stored in the page cache."
        );
        describe_counter!(
            "quaderno_posts_created_total",
            Unit::Count,
            "Total number of posts created."
        );
        describe_counter!(
            "quaderno_comments_created_total",
            Unit::Count,
            "Total number of comments created."
        );
        describe_counter!(
            "quaderno_sessions_opened_total",
            Unit::Count,
            "Total number of sessions opened by login or signup."
        );
        describe_counter!(
            "quaderno_login_failure_total",
            Unit::Count,
            "Total number of rejected login attempts."
        );
    });
}
