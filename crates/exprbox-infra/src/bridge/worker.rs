//! Worker backend: the engine sits behind a message channel only.
//!
//! With no synchronous path back to the host, lazy objects cannot fetch on
//! demand. Each job therefore carries the whole `WorkflowData` snapshot and
//! reads are answered from it inside the worker.
//!
//! Unconfined, like the other in-process backends: no heap cap, and a
//! timed-out worker is detached rather than stopped.

use std::sync::Arc;
use std::time::Instant;

use exprbox_core::bridge::{Bridge, StateCell};
use exprbox_core::store::{DataStore, WorkflowDataProxy};
use exprbox_types::bridge::{BridgeCapabilities, BridgeKind, BridgeState, ExecuteRequest};
use exprbox_types::config::BridgeConfig;
use exprbox_types::data::{DataId, DataPath};
use exprbox_types::error::{RuntimeError, RuntimeErrorCode};
use exprbox_types::value::{ExprValue, FetchMode, LazyValue};
use tokio::sync::Mutex;

use super::HostAccess;
use super::thread::IsolateThread;

const THREAD_NAME: &str = "exprbox-worker";

pub struct WorkerBridge {
    config: BridgeConfig,
    store: Arc<DataStore>,
    state: StateCell,
    worker: Mutex<Option<IsolateThread>>,
}

impl WorkerBridge {
    pub fn new(config: BridgeConfig, store: Arc<DataStore>) -> Self {
        Self {
            config,
            store,
            state: StateCell::new(),
            worker: Mutex::new(None),
        }
    }
}

impl Bridge for WorkerBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Worker
    }

    fn capabilities(&self) -> BridgeCapabilities {
        BridgeCapabilities {
            synchronous_host_callback: false,
            hard_memory_limit: false,
            forceful_cancellation: false,
            survives_timeout: true,
        }
    }

    fn state(&self) -> BridgeState {
        self.state.get()
    }

    fn data_store(&self) -> &Arc<DataStore> {
        &self.store
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        let mut worker = self.worker.lock().await;
        match self.state.get() {
            BridgeState::Ready | BridgeState::Executing => return Ok(()),
            BridgeState::Disposed => return Err(RuntimeError::disposed()),
            BridgeState::Uninitialized => {}
        }
        *worker = Some(IsolateThread::spawn(THREAD_NAME, &self.config).await?);
        self.state.mark_ready()?;
        tracing::debug!(backend = "worker", "bridge ready");
        Ok(())
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExprValue, RuntimeError> {
        let mut worker = self.worker.lock().await;
        let guard = self.state.begin()?;
        let Some(thread) = worker.as_ref() else {
            return Err(RuntimeError::not_initialized());
        };
        let snapshot = self.store.snapshot(&request.data_id)?;
        let meta = snapshot.meta();
        let timeout = request.timeout.unwrap_or_else(|| self.config.timeout());
        let started = Instant::now();

        let access = HostAccess::Snapshot(WorkflowDataProxy::new(snapshot));
        let outcome = thread.run(request.code, meta, access, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (result, respawn) = match outcome {
            Ok(Err(err)) if err.code == RuntimeErrorCode::BridgeLost => (Err(err), true),
            Ok(result) => (result, false),
            Err(_) => {
                tracing::warn!(backend = "worker", data_id = %request.data_id, elapsed_ms, "execution timed out; replacing worker");
                (Err(RuntimeError::timeout(timeout.as_millis() as u64)), true)
            }
        };
        if respawn {
            worker.take();
            match IsolateThread::spawn(THREAD_NAME, &self.config).await {
                Ok(fresh) => *worker = Some(fresh),
                Err(err) => {
                    tracing::error!(backend = "worker", error = %err, "failed to respawn worker");
                    guard.lost();
                    return result;
                }
            }
        } else {
            tracing::debug!(backend = "worker", data_id = %request.data_id, elapsed_ms, "execution finished");
        }
        result
    }

    /// Workers have no blocking path back to the host.
    fn get_data_sync(
        &self,
        _data_id: &DataId,
        _path: &DataPath,
        _mode: FetchMode,
    ) -> Result<LazyValue, RuntimeError> {
        Err(RuntimeError::internal(
            "worker bridge has no synchronous host callback; data is transferred eagerly",
        ))
    }

    async fn dispose(&self) {
        if self.state.dispose() {
            self.worker.lock().await.take();
            tracing::debug!(backend = "worker", "bridge disposed");
        }
    }
}
