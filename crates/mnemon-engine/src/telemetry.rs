//! Tracing subscriber setup for the engine's binaries.
//!
//! Consolidation is a batch job: a process wakes up, reconciles one
//! transcript, and exits.  Callers that already know how they want their
//! logs (the CLI reads it from its config vault) pass explicit
//! [`TelemetrySettings`] to [`init_tracing_with`]; [`init_tracing`] is the
//! env-only form for embedders with no config layer of their own.
//!
//! Span export is opt-in.  When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans
//! are shipped to that collector over OTLP/HTTP in addition to the console
//! output; otherwise the subscriber is console-only.  `RUST_LOG` always wins
//! over the settings' fallback filter.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Console log encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// Newline-delimited JSON records, one per event.
    Json,
}

impl LogFormat {
    /// Parse a format name as it appears in config files and env vars.
    /// Unknown names return `None` so callers can fall back to the default.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// How the subscriber should behave, resolved by the caller before init.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySettings {
    pub format: LogFormat,
    /// Filter directive used only when `RUST_LOG` is unset.  `None` means
    /// `"info"`.
    pub fallback_filter: Option<String>,
}

impl TelemetrySettings {
    /// Resolve settings from `MNEMON_LOG_FORMAT` alone.
    pub fn from_env() -> Self {
        let format = std::env::var("MNEMON_LOG_FORMAT")
            .ok()
            .and_then(|name| LogFormat::parse(&name))
            .unwrap_or_default();
        Self {
            format,
            fallback_filter: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialisation
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global subscriber using env-derived [`TelemetrySettings`].
pub fn init_tracing(service_name: &str) -> TelemetryGuard {
    init_tracing_with(service_name, TelemetrySettings::from_env())
}

/// Install the global `tracing` subscriber.
///
/// Returns a [`TelemetryGuard`] that must stay alive for the whole process;
/// dropping it flushes and shuts down the OTLP pipeline, if one was set up.
pub fn init_tracing_with(service_name: &str, settings: TelemetrySettings) -> TelemetryGuard {
    let fallback = settings.fallback_filter.as_deref().unwrap_or("info");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let provider = otlp_provider(service_name);
    let span_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("mnemon")));
    let (compact_layer, json_layer) = match settings.format {
        LogFormat::Compact => (Some(fmt::layer().compact()), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };

    // `Option<Layer>` composes as a no-op when `None`, so one chain covers
    // every format/export combination.
    tracing_subscriber::registry()
        .with(filter)
        .with(span_layer)
        .with(compact_layer)
        .with(json_layer)
        .init();

    TelemetryGuard { provider }
}

/// Flushes and shuts down the span pipeline on drop.  Hold it in `main`.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("telemetry shutdown failed: {e}");
        }
    }
}

/// Build the OTLP span provider, or `None` when export is not requested
/// (`OTEL_EXPORTER_OTLP_ENDPOINT` unset) or the exporter fails to build.
fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("OTLP exporter init failed: {e}"))
        .ok()?;

    // The simple exporter needs no Tokio runtime at init time; the blocking
    // entry points build theirs only after telemetry is already up.
    Some(
        SdkTracerProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            .with_simple_exporter(exporter)
            .build(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
