//! Observability port used by the evaluator.
//!
//! Providers are optional; [`NoopObservability`] stands in when none is
//! configured so the evaluator never has to branch on presence.

use std::fmt;

/// Attribute value attached to spans.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<f64> for AttrValue {
    fn from(x: f64) -> Self {
        AttrValue::Float(x)
    }
}

pub type Labels<'a> = &'a [(&'a str, &'a str)];

pub trait Metrics: Send + Sync {
    fn counter(&self, name: &str, value: u64, labels: Labels<'_>);

    fn gauge(&self, name: &str, value: f64, labels: Labels<'_>);

    fn histogram(&self, name: &str, value: f64, labels: Labels<'_>);
}

/// A started span. Ending consumes it.
pub trait SpanHandle: Send {
    fn set_attribute(&mut self, key: &str, value: AttrValue);

    fn record_error(&mut self, message: &str);

    fn end(self: Box<Self>);
}

pub trait Traces: Send + Sync {
    fn start_span(&self, name: &str, attributes: &[(&str, AttrValue)]) -> Box<dyn SpanHandle>;
}

pub trait Logs: Send + Sync {
    fn error(&self, message: &str, fields: Labels<'_>);

    fn warn(&self, message: &str, fields: Labels<'_>);

    fn info(&self, message: &str, fields: Labels<'_>);

    fn debug(&self, message: &str, fields: Labels<'_>);
}

/// Metrics, traces and logs bundled behind one handle.
pub trait ObservabilityProvider: Send + Sync {
    fn metrics(&self) -> &dyn Metrics;

    fn traces(&self) -> &dyn Traces;

    fn logs(&self) -> &dyn Logs;
}

/// Provider that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObservability;

struct NoopSpan;

impl SpanHandle for NoopSpan {
    fn set_attribute(&mut self, _key: &str, _value: AttrValue) {}

    fn record_error(&mut self, _message: &str) {}

    fn end(self: Box<Self>) {}
}

impl Metrics for NoopObservability {
    fn counter(&self, _name: &str, _value: u64, _labels: Labels<'_>) {}

    fn gauge(&self, _name: &str, _value: f64, _labels: Labels<'_>) {}

    fn histogram(&self, _name: &str, _value: f64, _labels: Labels<'_>) {}
}

impl Traces for NoopObservability {
    fn start_span(&self, _name: &str, _attributes: &[(&str, AttrValue)]) -> Box<dyn SpanHandle> {
        Box::new(NoopSpan)
    }
}

impl Logs for NoopObservability {
    fn error(&self, _message: &str, _fields: Labels<'_>) {}

    fn warn(&self, _message: &str, _fields: Labels<'_>) {}

    fn info(&self, _message: &str, _fields: Labels<'_>) {}

    fn debug(&self, _message: &str, _fields: Labels<'_>) {}
}

impl ObservabilityProvider for NoopObservability {
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

/// Metric and span names emitted by the evaluator.
pub mod names {
    pub const SPAN_EVALUATE: &str = "expression.evaluate";

    pub const CACHE_HIT: &str = "expression.cache.hit";
    pub const CACHE_MISS: &str = "expression.cache.miss";
    pub const CACHE_SIZE: &str = "expression.cache.size";
    pub const EVALUATIONS: &str = "expression.evaluations";
    pub const ERRORS: &str = "expression.errors";
    pub const DURATION_MS: &str = "expression.duration_ms";
    pub const BRIDGE_REPROVISIONED: &str = "expression.bridge.reprovisioned";

    pub const ATTR_CACHE_HIT: &str = "expression.cache_hit";
    pub const ATTR_BACKEND: &str = "expression.backend";
    pub const ATTR_OUTCOME: &str = "expression.outcome";
    pub const ATTR_WORKFLOW_ID: &str = "workflow.id";
    pub const ATTR_NODE_NAME: &str = "node.name";

    pub const LABEL_KIND: &str = "kind";
}
