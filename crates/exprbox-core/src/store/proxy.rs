//! Host-side view over one `WorkflowData` snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use exprbox_types::data::{DataPath, DataScope, ExecutionMeta, PathSegment, WorkflowData};
use exprbox_types::value::{FetchMode, LazyValue};
use serde_json::Value;

/// Resolves paths against an immutable snapshot.
///
/// Every resolved `(path, mode)` is memoized for the lifetime of the proxy,
/// which is the lifetime of one evaluation. Repeated reads of a path return
/// the first answer even if the caller's original data changes meanwhile.
#[derive(Debug)]
pub struct WorkflowDataProxy {
    data: Arc<WorkflowData>,
    resolved: Mutex<HashMap<(DataPath, FetchMode), LazyValue>>,
}

enum Located<'a> {
    Value(&'a Value),
    Items(&'a [Value]),
    Missing,
}

impl WorkflowDataProxy {
    pub fn new(data: Arc<WorkflowData>) -> Self {
        Self {
            data,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn data(&self) -> &Arc<WorkflowData> {
        &self.data
    }

    pub fn meta(&self) -> ExecutionMeta {
        self.data.meta()
    }

    /// Full value at `path`, or `None` when nothing is there.
    pub fn get(&self, path: impl Into<DataPath>) -> Option<Value> {
        match self.resolve(&path.into(), FetchMode::Full) {
            LazyValue::Materialized { value } | LazyValue::Primitive { value } => Some(value),
            _ => None,
        }
    }

    pub fn has(&self, path: impl Into<DataPath>) -> bool {
        !matches!(self.locate(&path.into()), Located::Missing)
    }

    /// Resolve `path` according to `mode`, memoized per proxy.
    pub fn resolve(&self, path: &DataPath, mode: FetchMode) -> LazyValue {
        let key = (path.clone(), mode);
        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = resolved.get(&key) {
            return hit.clone();
        }
        let value = match self.locate(path) {
            Located::Missing => LazyValue::Missing,
            Located::Value(v) => LazyValue::from_value(v, mode),
            Located::Items(items) => match mode {
                FetchMode::Shallow => LazyValue::Array { len: items.len() },
                FetchMode::Full => LazyValue::Materialized {
                    value: Value::Array(items.to_vec()),
                },
            },
        };
        resolved.insert(key, value.clone());
        value
    }

    /// Number of distinct `(path, mode)` pairs resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.resolved.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn locate(&self, path: &DataPath) -> Located<'_> {
        let mut cursor = match &path.scope {
            DataScope::Json => Located::Value(&self.data.json),
            DataScope::Input => Located::Items(&self.data.items),
            DataScope::Node(name) => match self.data.node_outputs.get(name) {
                Some(items) => Located::Items(items),
                None => Located::Missing,
            },
        };
        for segment in &path.segments {
            cursor = match (cursor, segment) {
                (Located::Missing, _) => return Located::Missing,
                (Located::Items(items), seg) => match index_of(seg) {
                    Some(i) => items.get(i).map_or(Located::Missing, Located::Value),
                    None => Located::Missing,
                },
                (Located::Value(Value::Object(map)), seg) => {
                    let key = seg.to_string();
                    map.get(&key).map_or(Located::Missing, Located::Value)
                }
                (Located::Value(Value::Array(items)), seg) => match index_of(seg) {
                    Some(i) => items.get(i).map_or(Located::Missing, Located::Value),
                    None => Located::Missing,
                },
                (Located::Value(_), _) => Located::Missing,
            };
        }
        cursor
    }
}

fn index_of(segment: &PathSegment) -> Option<usize> {
    match segment {
        PathSegment::Index(i) => Some(*i),
        PathSegment::Key(k) => k.parse().ok(),
    }
}
