//! Structured logging setup. The core emits `tracing` events everywhere;
//! embedding applications call `init_telemetry` once (or install their own
//! subscriber) to get JSON output with span context and env-filter control.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("pitcrew telemetry initialized with structured logging");
    Ok(())
}

/// Correlation ID for linking one session's events across components.
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span carrying the common attributes of a group execution.
pub fn create_group_span(session: &str, group_id: &str, correlation_id: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "group_execution",
        session = session,
        group.id = group_id,
        correlation_id = correlation_id,
    )
}
