//! Process-local LRU of compiled expressions.
//!
//! Keys are the raw expression text; values are compiled (and possibly
//! transformed) code. Host data is never cached here.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

/// Transformed or validated code ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledExpression {
    pub code: String,
    /// Whether the tournament ran over `code`.
    pub transformed: bool,
}

pub struct ExpressionCache {
    entries: Mutex<LruCache<String, Arc<CompiledExpression>>>,
}

impl ExpressionCache {
    /// `None` when `capacity` is zero.
    pub fn new(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(|cap| Self {
            entries: Mutex::new(LruCache::new(cap)),
        })
    }

    /// Entry for `expression` compiled with the same transform setting.
    ///
    /// A hit refreshes the entry's recency.
    pub fn get(&self, expression: &str, transformed: bool) -> Option<Arc<CompiledExpression>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(expression)
            .filter(|entry| entry.transformed == transformed)
            .cloned()
    }

    /// Insert, evicting exactly one least-recently-used entry when full.
    ///
    /// Returns the evicted key, if any.
    pub fn insert(&self, expression: &str, compiled: CompiledExpression) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.push(expression.to_string(), Arc::new(compiled)) {
            Some((evicted, _)) if evicted != expression => Some(evicted),
            _ => None,
        }
    }

    /// Presence check that does not touch recency.
    pub fn contains(&self, expression: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(expression)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
