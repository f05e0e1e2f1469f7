//! Logging and OpenTelemetry initialisation.
//!
//! Call [`init_tracing`] once at process startup to wire up the `tracing`
//! subscriber with an optional OTLP span exporter.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set the OTLP HTTP exporter is activated. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//!
//! The output style (compact text or newline-delimited JSON) comes from
//! [`ExecutiveConfig::log_format`][crate::config::ExecutiveConfig::log_format].
//!
//! # Example
//!
//! ```rust,no_run
//! use simbridge_runtime::{telemetry::init_tracing, LogFormat};
//!
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = init_tracing("simbridge", LogFormat::Compact);
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Name of the tracer registered with the OTel provider.
const TRACER_NAME: &str = "simbridge";

/// Initialise the global `tracing` subscriber.
///
/// When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans are additionally
/// forwarded to that collector over OTLP/HTTP.  Without it only the console
/// formatter is installed.
///
/// A second call leaves the first subscriber in place and reports the
/// conflict on stderr.
///
/// The returned [`TracerProviderGuard`] **must** be held for the lifetime of
/// the process; dropping it flushes pending spans.
pub fn init_tracing(service_name: &str, format: LogFormat) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(TRACER_NAME)));

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with((format == LogFormat::Json).then(|| fmt::layer().json()))
        .with((format == LogFormat::Compact).then(|| fmt::layer().compact()))
        .try_init();
    if let Err(e) = result {
        eprintln!("[simbridge] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

/// RAII guard that shuts down the OTel [`SdkTracerProvider`] on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported to a collector.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[simbridge] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// Build an [`SdkTracerProvider`] when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// Returns `None` when the variable is absent or the exporter cannot be
/// initialised; the error goes to stderr since no subscriber exists yet.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[simbridge] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple (synchronous) export: the bridge runs on plain threads and has no
    // async runtime for a batch processor to live on.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
