//! Heap-isolate backend: one long-lived engine per bridge.
//!
//! Globals and helpers are installed once at `initialize()`. Reads block the
//! engine thread on a direct call into the shared store, so lazy objects
//! work unchanged. A timed-out engine is still running the job and cannot
//! be reused; the bridge disposes itself and leaves replacement to the
//! evaluator's factory.
//!
//! Unconfined: `memory_limit_mb` is not enforced and the abandoned job keeps
//! its thread busy until the iteration budget stops it. Tests and trusted
//! input only.

use std::sync::Arc;
use std::time::Instant;

use exprbox_core::bridge::{Bridge, StateCell};
use exprbox_core::store::DataStore;
use exprbox_types::bridge::{BridgeCapabilities, BridgeKind, BridgeState, ExecuteRequest};
use exprbox_types::config::BridgeConfig;
use exprbox_types::error::{RuntimeError, RuntimeErrorCode};
use exprbox_types::value::ExprValue;
use tokio::sync::Mutex;

use super::HostAccess;
use super::thread::IsolateThread;

pub struct IsolateBridge {
    config: BridgeConfig,
    store: Arc<DataStore>,
    state: StateCell,
    engine: Mutex<Option<IsolateThread>>,
}

impl IsolateBridge {
    pub fn new(config: BridgeConfig, store: Arc<DataStore>) -> Self {
        Self {
            config,
            store,
            state: StateCell::new(),
            engine: Mutex::new(None),
        }
    }
}

impl Bridge for IsolateBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Isolate
    }

    fn capabilities(&self) -> BridgeCapabilities {
        BridgeCapabilities {
            synchronous_host_callback: true,
            hard_memory_limit: false,
            forceful_cancellation: false,
            survives_timeout: false,
        }
    }

    fn state(&self) -> BridgeState {
        self.state.get()
    }

    fn data_store(&self) -> &Arc<DataStore> {
        &self.store
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        let mut engine = self.engine.lock().await;
        match self.state.get() {
            BridgeState::Ready | BridgeState::Executing => return Ok(()),
            BridgeState::Disposed => return Err(RuntimeError::disposed()),
            BridgeState::Uninitialized => {}
        }
        *engine = Some(IsolateThread::spawn("exprbox-isolate", &self.config).await?);
        self.state.mark_ready()?;
        tracing::debug!(backend = "isolate", "bridge ready");
        Ok(())
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExprValue, RuntimeError> {
        let mut engine = self.engine.lock().await;
        let guard = self.state.begin()?;
        let Some(thread) = engine.as_ref() else {
            return Err(RuntimeError::not_initialized());
        };
        let meta = self.store.meta(&request.data_id)?;
        let timeout = request.timeout.unwrap_or_else(|| self.config.timeout());
        let started = Instant::now();

        let access = HostAccess::Store {
            store: Arc::clone(&self.store),
            data_id: request.data_id,
        };
        let outcome = thread.run(request.code, meta, access, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Err(err)) if err.code == RuntimeErrorCode::BridgeLost => {
                tracing::error!(backend = "isolate", data_id = %request.data_id, error = %err, "engine thread lost");
                engine.take();
                guard.lost();
                Err(err)
            }
            Ok(result) => {
                tracing::debug!(backend = "isolate", data_id = %request.data_id, elapsed_ms, "execution finished");
                result
            }
            Err(_) => {
                tracing::warn!(backend = "isolate", data_id = %request.data_id, elapsed_ms, "execution timed out; disposing isolate");
                engine.take();
                guard.lost();
                Err(RuntimeError::timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn dispose(&self) {
        if self.state.dispose() {
            self.engine.lock().await.take();
            tracing::debug!(backend = "isolate", "bridge disposed");
        }
    }
}
