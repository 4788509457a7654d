//! Fallback backend: a fresh engine per call, no state kept between calls.
//! Unconfined; meant for tests.

use std::sync::Arc;
use std::time::Instant;

use exprbox_core::bridge::{Bridge, StateCell};
use exprbox_core::store::DataStore;
use exprbox_types::bridge::{BridgeCapabilities, BridgeKind, BridgeState, ExecuteRequest};
use exprbox_types::config::BridgeConfig;
use exprbox_types::error::RuntimeError;
use exprbox_types::value::ExprValue;
use tokio::sync::Mutex;

use super::HostAccess;
use super::thread::IsolateThread;
use crate::isolate::JsIsolate;

pub struct InProcessBridge {
    config: BridgeConfig,
    store: Arc<DataStore>,
    state: StateCell,
    serial: Mutex<()>,
}

impl InProcessBridge {
    pub fn new(config: BridgeConfig, store: Arc<DataStore>) -> Self {
        Self {
            config,
            store,
            state: StateCell::new(),
            serial: Mutex::new(()),
        }
    }
}

impl Bridge for InProcessBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::InProcess
    }

    fn capabilities(&self) -> BridgeCapabilities {
        BridgeCapabilities {
            synchronous_host_callback: true,
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
        if self.state.get() == BridgeState::Ready {
            return Ok(());
        }
        // Fail early if the engine cannot be set up with this config.
        JsIsolate::new(&self.config)?;
        self.state.mark_ready()?;
        tracing::debug!(backend = "in_process", "bridge ready");
        Ok(())
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExprValue, RuntimeError> {
        let _serial = self.serial.lock().await;
        let _guard = self.state.begin()?;
        let meta = self.store.meta(&request.data_id)?;
        let timeout = request.timeout.unwrap_or_else(|| self.config.timeout());
        let started = Instant::now();

        let engine = IsolateThread::spawn("exprbox-in-process", &self.config).await?;
        let access = HostAccess::Store {
            store: Arc::clone(&self.store),
            data_id: request.data_id,
        };
        let outcome = engine.run(request.code, meta, access, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                tracing::debug!(backend = "in_process", data_id = %request.data_id, elapsed_ms, "execution finished");
                result
            }
            Err(_) => {
                tracing::warn!(backend = "in_process", data_id = %request.data_id, elapsed_ms, "execution timed out; engine abandoned");
                Err(RuntimeError::timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn dispose(&self) {
        if self.state.dispose() {
            tracing::debug!(backend = "in_process", "bridge disposed");
        }
    }
}
