//! Tracing subscriber setup with layered architecture
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, else logging.level)
//!   ├── Fmt Layer (pretty or json, stderr)
//!   └── OpenTelemetry Layer (feature `tracing`, when enabled)
//! ```
//!
//! Logs go to stderr so stdout stays free for command output.

use crate::config::{LoggingConfig, TracingConfig};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during subscriber initialization
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("Failed to initialize OTLP exporter: {0}")]
    ExporterError(String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Flushes exported spans when dropped
#[derive(Debug)]
pub struct TelemetryGuard {
    active: bool,
}

impl TelemetryGuard {
    fn inactive() -> Self {
        Self { active: false }
    }

    /// Whether spans are being exported
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.active {
            #[cfg(feature = "tracing")]
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

/// Filter from RUST_LOG, falling back to the configured level
pub fn build_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|_| TelemetryError::InvalidFilter(level.to_string())),
    }
}

/// Install the global subscriber.
///
/// `tracing` is only honoured when built with the `tracing` feature.
pub fn init_subscriber(
    logging: &LoggingConfig,
    tracing_config: Option<&TracingConfig>,
) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = build_filter(&logging.level)?;

    let json = logging.format == "json";
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let pretty_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer);

    #[cfg(feature = "tracing")]
    {
        let (otel_layer, guard) = otel::layer(tracing_config)?;
        tracing::subscriber::set_global_default(subscriber.with(otel_layer))
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    #[cfg(not(feature = "tracing"))]
    {
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
        if tracing_config.is_some_and(|t| t.enabled) {
            tracing::warn!("tracing.enabled is set but span export requires the `tracing` feature");
        }
        Ok(TelemetryGuard::inactive())
    }
}

#[cfg(feature = "tracing")]
mod otel {
    use super::{TelemetryError, TelemetryGuard};
    use crate::config::TracingConfig;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::Resource;
    use tracing_opentelemetry::OpenTelemetryLayer;
    use tracing_subscriber::registry::LookupSpan;

    type Layer<S> = OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>;

    /// OTLP export layer, `None` when tracing is absent or disabled
    pub(super) fn layer<S>(
        config: Option<&TracingConfig>,
    ) -> Result<(Option<Layer<S>>, TelemetryGuard), TelemetryError>
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    {
        let Some(config) = config.filter(|c| c.enabled) else {
            return Ok((None, TelemetryGuard::inactive()));
        };

        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(config.otlp_endpoint.clone()),
            )
            .with_trace_config(opentelemetry_sdk::trace::config().with_resource(Resource::new(
                vec![KeyValue::new("service.name", config.service_name.clone())],
            )))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .map_err(|e| TelemetryError::ExporterError(e.to_string()))?;

        Ok((
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            TelemetryGuard { active: true },
        ))
    }
}
