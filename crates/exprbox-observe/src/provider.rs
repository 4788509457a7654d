//! `ObservabilityProvider` backed by `tracing`.
//!
//! Spans become `tracing` spans (exported through the OpenTelemetry layer
//! when it is installed), logs become `tracing` events, and metrics are
//! aggregated in process so they can be inspected with [`snapshot`].
//!
//! [`snapshot`]: TracingObservability::snapshot

use std::collections::BTreeMap;

use dashmap::DashMap;
use exprbox_core::observability::{
    AttrValue, Labels, Logs, Metrics, ObservabilityProvider, SpanHandle, Traces,
};
use serde::Serialize;
use tracing::field::Empty;

/// Running summary of one histogram series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Point-in-time copy of every series, keyed `name{label=value,...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

#[derive(Debug, Default)]
pub struct TracingObservability {
    counters: DashMap<String, u64>,
    gauges: DashMap<String, f64>,
    histograms: DashMap<String, HistogramSummary>,
}

impl TracingObservability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    /// Current value of a counter series, zero if never incremented.
    pub fn counter_value(&self, name: &str, labels: Labels<'_>) -> u64 {
        self.counters
            .get(&series_key(name, labels))
            .map_or(0, |v| *v)
    }
}

/// `name{a=1,b=2}` with labels sorted by key; bare `name` without labels.
fn series_key(name: &str, labels: Labels<'_>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

impl Metrics for TracingObservability {
    fn counter(&self, name: &str, value: u64, labels: Labels<'_>) {
        let key = series_key(name, labels);
        tracing::trace!(target: "exprbox::metrics", series = %key, value, "counter");
        *self.counters.entry(key).or_insert(0) += value;
    }

    fn gauge(&self, name: &str, value: f64, labels: Labels<'_>) {
        let key = series_key(name, labels);
        tracing::trace!(target: "exprbox::metrics", series = %key, value, "gauge");
        self.gauges.insert(key, value);
    }

    fn histogram(&self, name: &str, value: f64, labels: Labels<'_>) {
        let key = series_key(name, labels);
        tracing::trace!(target: "exprbox::metrics", series = %key, value, "histogram");
        self.histograms
            .entry(key)
            .and_modify(|summary| summary.observe(value))
            .or_insert_with(|| HistogramSummary::first(value));
    }
}

struct TracingSpan {
    span: tracing::Span,
}

impl SpanHandle for TracingSpan {
    fn set_attribute(&mut self, key: &str, value: AttrValue) {
        match value {
            AttrValue::Str(s) => self.span.record(key, s.as_str()),
            AttrValue::Bool(b) => self.span.record(key, b),
            AttrValue::Int(i) => self.span.record(key, i),
            AttrValue::Float(x) => self.span.record(key, x),
        };
    }

    fn record_error(&mut self, message: &str) {
        self.span.record("otel.status_code", "ERROR");
        self.span.record("error.message", message);
    }

    fn end(self: Box<Self>) {
        // Dropping the last handle closes the span.
    }
}

impl Traces for TracingObservability {
    fn start_span(&self, name: &str, attributes: &[(&str, AttrValue)]) -> Box<dyn SpanHandle> {
        // Span fields must be declared up front; attributes outside this set
        // are ignored by `record`.
        let span = tracing::info_span!(
            target: "exprbox::evaluator",
            "expression.evaluate",
            otel.name = %name,
            otel.status_code = Empty,
            error.message = Empty,
            expression.cache_hit = Empty,
            expression.backend = Empty,
            expression.outcome = Empty,
            workflow.id = Empty,
            node.name = Empty,
        );
        let mut handle = TracingSpan { span };
        for (key, value) in attributes {
            handle.set_attribute(key, value.clone());
        }
        Box::new(handle)
    }
}

fn render(fields: Labels<'_>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Logs for TracingObservability {
    fn error(&self, message: &str, fields: Labels<'_>) {
        tracing::error!(target: "exprbox", fields = %render(fields), "{message}");
    }

    fn warn(&self, message: &str, fields: Labels<'_>) {
        tracing::warn!(target: "exprbox", fields = %render(fields), "{message}");
    }

    fn info(&self, message: &str, fields: Labels<'_>) {
        tracing::info!(target: "exprbox", fields = %render(fields), "{message}");
    }

    fn debug(&self, message: &str, fields: Labels<'_>) {
        tracing::debug!(target: "exprbox", fields = %render(fields), "{message}");
    }
}

impl ObservabilityProvider for TracingObservability {
    fn metrics(&self) -> &dyn Metrics {
        self
    }

    fn traces(&self) -> &dyn Traces {
        self
    }

    fn logs(&self) -> &dyn Logs {
        self
    }
}
