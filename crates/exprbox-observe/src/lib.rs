//! Observability wiring for exprbox: subscriber setup and a `tracing`-backed
//! implementation of the evaluator's `ObservabilityProvider` port.

pub mod provider;
pub mod tracing_setup;

pub use provider::{HistogramSummary, MetricsSnapshot, TracingObservability};
