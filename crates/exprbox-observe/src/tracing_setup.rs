//! Global subscriber for the `exprbox` binary.
//!
//! Log lines always go to stderr: stdout belongs to command output, and for
//! the runner child it carries the wire protocol.
//!
//! ```no_run
//! use exprbox_observe::tracing_setup::{LogOptions, init_tracing};
//!
//! init_tracing(&LogOptions::new("warn").json(true)).unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Env var that overrides the filter chosen from CLI verbosity.
pub const LOG_ENV: &str = "EXPRBOX_LOG";

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directive used when `EXPRBOX_LOG` is unset or invalid.
    pub default_filter: String,
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
    /// Also export spans through OpenTelemetry (stdout exporter).
    pub otel: bool,
}

impl LogOptions {
    pub fn new(default_filter: impl Into<String>) -> Self {
        Self {
            default_filter: default_filter.into(),
            json: false,
            otel: false,
        }
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn otel(mut self, otel: bool) -> Self {
        self.otel = otel;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(options: &LogOptions) -> Result<(), Box<dyn std::error::Error>> {
    let (text, json) = if options.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        (Some(layer), None)
    };

    let otel = options.otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("exprbox");
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(options.filter())
        .with(text)
        .with(json)
        .with(otel)
        .try_init()?;
    Ok(())
}

/// Flush buffered spans. No-op unless OpenTelemetry export was enabled.
pub fn shutdown_tracing() {
    let Some(provider) = TRACER_PROVIDER.get() else {
        return;
    };
    if let Err(err) = provider.shutdown() {
        eprintln!("warning: failed to flush OpenTelemetry spans: {err}");
    }
}
