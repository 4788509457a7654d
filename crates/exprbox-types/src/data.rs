//! Workflow data snapshots and the paths used to address into them.
//!
//! A `WorkflowData` is the immutable context an expression may read. Inside
//! the isolate nothing holds the real data; every read is expressed as a
//! `DataPath` and resolved on the host side.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Immutable snapshot of everything one evaluation is allowed to read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowData {
    /// JSON payload of the current item (`$json`).
    #[serde(default)]
    pub json: Value,
    /// JSON payloads of all input items of the current node (`$input`).
    #[serde(default)]
    pub items: Vec<Value>,
    /// Index of the current item within `items`.
    #[serde(default)]
    pub item_index: usize,
    /// How many times the current node has run in this execution.
    #[serde(default)]
    pub run_index: usize,
    /// Output items of previously executed nodes, keyed by node name (`$("Node")`).
    #[serde(default)]
    pub node_outputs: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
}

impl WorkflowData {
    /// Snapshot holding only a current-item payload, mirrored as the single input item.
    pub fn new(json: Value) -> Self {
        Self {
            items: vec![json.clone()],
            json,
            ..Self::default()
        }
    }

    pub fn with_items(mut self, items: Vec<Value>, item_index: usize) -> Self {
        self.items = items;
        self.item_index = item_index;
        self
    }

    pub fn with_node_output(mut self, node: impl Into<String>, items: Vec<Value>) -> Self {
        self.node_outputs.insert(node.into(), items);
        self
    }

    pub fn with_workflow(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self.workflow_name = Some(name.into());
        self
    }

    pub fn with_node(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    pub fn with_execution(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    /// Identifiers and counters that are handed to the isolate eagerly.
    pub fn meta(&self) -> ExecutionMeta {
        ExecutionMeta {
            workflow_id: self.workflow_id.clone(),
            workflow_name: self.workflow_name.clone(),
            node_name: self.node_name.clone(),
            execution_id: self.execution_id.clone(),
            item_index: self.item_index,
            run_index: self.run_index,
        }
    }
}

/// The small, always-eager part of a `WorkflowData`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMeta {
    pub workflow_id: Option<String>,
    pub workflow_name: Option<String>,
    pub node_name: Option<String>,
    pub execution_id: Option<String>,
    pub item_index: usize,
    pub run_index: usize,
}

/// Opaque handle binding one data snapshot to one in-flight execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(pub Uuid);

impl DataId {
    /// Mint a fresh, never-reused id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DataId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which part of a `WorkflowData` a path is rooted in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "name")]
pub enum DataScope {
    /// The current item payload.
    Json,
    /// The array of input item payloads.
    Input,
    /// The output items of a named node.
    Node(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => f.write_str(k),
        }
    }
}

/// A scoped path into a `WorkflowData`.
///
/// The textual form is dotted: `user.address.city` for the current item,
/// `$input.0.name` for input items and `$("Fetch").0.id` for node outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataPath {
    pub scope: DataScope,
    #[serde(default)]
    pub segments: Vec<PathSegment>,
}

impl DataPath {
    pub fn json() -> Self {
        Self::root(DataScope::Json)
    }

    pub fn input() -> Self {
        Self::root(DataScope::Input)
    }

    pub fn node(name: impl Into<String>) -> Self {
        Self::root(DataScope::Node(name.into()))
    }

    pub fn root(scope: DataScope) -> Self {
        Self {
            scope,
            segments: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Child path one object key deeper.
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.segments.push(PathSegment::Key(key.into()));
        child
    }

    /// Child path one array index deeper.
    pub fn index(&self, index: usize) -> Self {
        let mut child = self.clone();
        child.segments.push(PathSegment::Index(index));
        child
    }

    /// True when `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &DataPath) -> bool {
        self.scope == other.scope
            && self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    fn push_dotted(&mut self, dotted: &str) {
        for part in dotted.split('.').filter(|p| !p.is_empty()) {
            let segment = match part.parse::<usize>() {
                Ok(i) => PathSegment::Index(i),
                Err(_) => PathSegment::Key(part.to_string()),
            };
            self.segments.push(segment);
        }
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = match &self.scope {
            DataScope::Json => true,
            DataScope::Input => {
                f.write_str("$input")?;
                false
            }
            DataScope::Node(name) => {
                write!(f, "$(\"{name}\")")?;
                false
            }
        };
        for segment in &self.segments {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for DataPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mut path, rest) = if let Some(rest) = s.strip_prefix("$input") {
            (DataPath::input(), rest)
        } else if let Some(after) = s.strip_prefix("$(\"") {
            match after.find("\")") {
                Some(end) => (DataPath::node(&after[..end]), &after[end + 2..]),
                None => (DataPath::json(), s),
            }
        } else {
            (DataPath::json(), s)
        };
        path.push_dotted(rest);
        Ok(path)
    }
}

impl From<&str> for DataPath {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(path) => path,
            Err(never) => match never {},
        }
    }
}
