//! Lazy data store: in-flight evaluation contexts keyed by `DataId`.
//!
//! The evaluator registers a snapshot right before `Bridge::execute` and the
//! returned `DataLease` removes it again when the call ends, whichever way
//! it ends. Bridges resolve isolate reads through `get_data_sync`.

mod proxy;

pub use proxy::WorkflowDataProxy;

use std::sync::Arc;

use dashmap::DashMap;
use exprbox_types::data::{DataId, DataPath, ExecutionMeta, WorkflowData};
use exprbox_types::error::RuntimeError;
use exprbox_types::value::{FetchMode, LazyValue};

/// Observer notified of every host-side data read.
pub trait AccessListener: Send + Sync {
    fn on_read(&self, data_id: &DataId, path: &DataPath, mode: FetchMode);

    /// A whole snapshot was handed out for eager transfer.
    fn on_snapshot(&self, _data_id: &DataId) {}
}

#[derive(Default)]
pub struct DataStore {
    entries: DashMap<DataId, Arc<WorkflowDataProxy>>,
    listener: Option<Arc<dyn AccessListener>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: Arc<dyn AccessListener>) -> Self {
        Self {
            entries: DashMap::new(),
            listener: Some(listener),
        }
    }

    /// Bind `data` to a freshly minted id for the duration of one call.
    pub fn register(self: &Arc<Self>, data: Arc<WorkflowData>) -> DataLease {
        let id = DataId::new();
        self.entries
            .insert(id, Arc::new(WorkflowDataProxy::new(data)));
        tracing::trace!(data_id = %id, "registered evaluation context");
        DataLease {
            store: Arc::clone(self),
            id,
        }
    }

    pub fn proxy(&self, data_id: &DataId) -> Result<Arc<WorkflowDataProxy>, RuntimeError> {
        self.entries
            .get(data_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RuntimeError::internal(format!("unknown data id {data_id}")))
    }

    /// Synchronous host read used by isolates that can block mid-execution.
    pub fn get_data_sync(
        &self,
        data_id: &DataId,
        path: &DataPath,
        mode: FetchMode,
    ) -> Result<LazyValue, RuntimeError> {
        let proxy = self.proxy(data_id)?;
        if let Some(listener) = &self.listener {
            listener.on_read(data_id, path, mode);
        }
        Ok(proxy.resolve(path, mode))
    }

    pub fn meta(&self, data_id: &DataId) -> Result<ExecutionMeta, RuntimeError> {
        Ok(self.proxy(data_id)?.meta())
    }

    /// The full snapshot, for backends that must transfer it eagerly.
    pub fn snapshot(&self, data_id: &DataId) -> Result<Arc<WorkflowData>, RuntimeError> {
        let proxy = self.proxy(data_id)?;
        if let Some(listener) = &self.listener {
            listener.on_snapshot(data_id);
        }
        Ok(Arc::clone(proxy.data()))
    }

    pub fn contains(&self, data_id: &DataId) -> bool {
        self.entries.contains_key(data_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn release(&self, data_id: &DataId) {
        if self.entries.remove(data_id).is_some() {
            tracing::trace!(data_id = %data_id, "released evaluation context");
        }
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("entries", &self.entries.len())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Keeps one registration alive. Dropping it removes the entry.
#[derive(Debug)]
pub struct DataLease {
    store: Arc<DataStore>,
    id: DataId,
}

impl DataLease {
    pub fn id(&self) -> DataId {
        self.id
    }
}

impl Drop for DataLease {
    fn drop(&mut self) {
        self.store.release(&self.id);
    }
}

/// Listener that records every read, in order. Useful for instrumentation and tests.
#[derive(Debug, Default)]
pub struct RecordingListener {
    reads: std::sync::Mutex<Vec<(DataId, DataPath, FetchMode)>>,
    snapshots: std::sync::atomic::AtomicUsize,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> Vec<(DataId, DataPath, FetchMode)> {
        self.reads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Textual paths read, in order.
    pub fn paths(&self) -> Vec<String> {
        self.reads().into_iter().map(|(_, p, _)| p.to_string()).collect()
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.reads.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.snapshots.store(0, std::sync::atomic::Ordering::SeqCst);
    }
}

impl AccessListener for RecordingListener {
    fn on_read(&self, data_id: &DataId, path: &DataPath, mode: FetchMode) {
        self.reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((*data_id, path.clone(), mode));
    }

    fn on_snapshot(&self, _data_id: &DataId) {
        self.snapshots
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lease_drop_removes_entry() {
        let store = Arc::new(DataStore::new());
        let lease = store.register(Arc::new(WorkflowData::new(json!({"a": 1}))));
        let id = lease.id();
        assert!(store.contains(&id));
        drop(lease);
        assert!(!store.contains(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn each_registration_gets_a_fresh_id() {
        let store = Arc::new(DataStore::new());
        let data = Arc::new(WorkflowData::new(json!({})));
        let a = store.register(Arc::clone(&data));
        let b = store.register(data);
        assert_ne!(a.id(), b.id());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unknown_id_is_an_internal_error() {
        let store = DataStore::new();
        let err = store
            .get_data_sync(&DataId::new(), &DataPath::json(), FetchMode::Shallow)
            .expect_err("unknown id");
        assert_eq!(err.code, exprbox_types::error::RuntimeErrorCode::Internal);
    }

    #[test]
    fn listener_sees_reads_in_order() {
        let listener = Arc::new(RecordingListener::new());
        let store = Arc::new(DataStore::with_listener(listener.clone()));
        let lease = store.register(Arc::new(WorkflowData::new(json!({"a": {"b": 1}}))));
        store
            .get_data_sync(&lease.id(), &DataPath::from("a"), FetchMode::Shallow)
            .expect("read a");
        let leaf = store
            .get_data_sync(&lease.id(), &DataPath::from("a.b"), FetchMode::Shallow)
            .expect("read a.b");
        assert_eq!(leaf, LazyValue::Primitive { value: json!(1) });
        assert_eq!(listener.paths(), vec!["a".to_string(), "a.b".to_string()]);
    }

    #[test]
    fn snapshot_hands_out_the_registered_data() {
        let listener = Arc::new(RecordingListener::new());
        let store = Arc::new(DataStore::with_listener(listener.clone()));
        let data = Arc::new(WorkflowData::new(json!({"x": true})));
        let lease = store.register(Arc::clone(&data));
        let snap = store.snapshot(&lease.id()).expect("snapshot");
        assert_eq!(*snap, *data);
        assert_eq!(listener.snapshots(), 1);
    }
}
