//! BoxBridge -- object-safe dynamic dispatch wrapper for Bridge.
//!
//! 1. Define an object-safe `BridgeDyn` trait with boxed futures
//! 2. Blanket-impl `BridgeDyn` for all `T: Bridge`
//! 3. `BoxBridge` wraps `Box<dyn BridgeDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use exprbox_types::bridge::{BridgeCapabilities, BridgeKind, BridgeState, ExecuteRequest};
use exprbox_types::data::{DataId, DataPath};
use exprbox_types::error::RuntimeError;
use exprbox_types::value::{ExprValue, FetchMode, LazyValue};

use super::Bridge;
use crate::store::DataStore;

/// Builds a fresh, uninitialized bridge. Used to replace a lost one.
pub type BridgeFactory = Arc<dyn Fn() -> BoxBridge + Send + Sync>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`Bridge`] with boxed futures.
///
/// A blanket implementation is provided for all types implementing `Bridge`.
pub trait BridgeDyn: Send + Sync {
    fn kind(&self) -> BridgeKind;

    fn capabilities(&self) -> BridgeCapabilities;

    fn state(&self) -> BridgeState;

    fn data_store(&self) -> &Arc<DataStore>;

    fn initialize_boxed(&self) -> BoxFuture<'_, Result<(), RuntimeError>>;

    fn execute_boxed(&self, request: ExecuteRequest) -> BoxFuture<'_, Result<ExprValue, RuntimeError>>;

    fn get_data_boxed<'a>(
        &'a self,
        data_id: &'a DataId,
        path: &'a DataPath,
        mode: FetchMode,
    ) -> BoxFuture<'a, Result<LazyValue, RuntimeError>>;

    fn get_data_sync(
        &self,
        data_id: &DataId,
        path: &DataPath,
        mode: FetchMode,
    ) -> Result<LazyValue, RuntimeError>;

    fn dispose_boxed(&self) -> BoxFuture<'_, ()>;

    fn is_disposed(&self) -> bool;
}

impl<T: Bridge> BridgeDyn for T {
    fn kind(&self) -> BridgeKind {
        Bridge::kind(self)
    }

    fn capabilities(&self) -> BridgeCapabilities {
        Bridge::capabilities(self)
    }

    fn state(&self) -> BridgeState {
        Bridge::state(self)
    }

    fn data_store(&self) -> &Arc<DataStore> {
        Bridge::data_store(self)
    }

    fn initialize_boxed(&self) -> BoxFuture<'_, Result<(), RuntimeError>> {
        Box::pin(self.initialize())
    }

    fn execute_boxed(&self, request: ExecuteRequest) -> BoxFuture<'_, Result<ExprValue, RuntimeError>> {
        Box::pin(self.execute(request))
    }

    fn get_data_boxed<'a>(
        &'a self,
        data_id: &'a DataId,
        path: &'a DataPath,
        mode: FetchMode,
    ) -> BoxFuture<'a, Result<LazyValue, RuntimeError>> {
        Box::pin(self.get_data(data_id, path, mode))
    }

    fn get_data_sync(
        &self,
        data_id: &DataId,
        path: &DataPath,
        mode: FetchMode,
    ) -> Result<LazyValue, RuntimeError> {
        Bridge::get_data_sync(self, data_id, path, mode)
    }

    fn dispose_boxed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.dispose())
    }

    fn is_disposed(&self) -> bool {
        Bridge::is_disposed(self)
    }
}

/// Type-erased bridge for backend selection at configuration time.
///
/// Since `Bridge` uses RPITIT, it cannot be used as a trait object directly.
/// `BoxBridge` provides equivalent methods that delegate to the inner
/// `BridgeDyn` trait object.
pub struct BoxBridge {
    inner: Box<dyn BridgeDyn>,
}

impl BoxBridge {
    pub fn new<T: Bridge + 'static>(bridge: T) -> Self {
        Self {
            inner: Box::new(bridge),
        }
    }

    pub fn kind(&self) -> BridgeKind {
        self.inner.kind()
    }

    pub fn capabilities(&self) -> BridgeCapabilities {
        self.inner.capabilities()
    }

    pub fn state(&self) -> BridgeState {
        self.inner.state()
    }

    pub fn data_store(&self) -> &Arc<DataStore> {
        self.inner.data_store()
    }

    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        self.inner.initialize_boxed().await
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExprValue, RuntimeError> {
        self.inner.execute_boxed(request).await
    }

    pub async fn get_data(
        &self,
        data_id: &DataId,
        path: &DataPath,
        mode: FetchMode,
    ) -> Result<LazyValue, RuntimeError> {
        self.inner.get_data_boxed(data_id, path, mode).await
    }

    pub fn get_data_sync(
        &self,
        data_id: &DataId,
        path: &DataPath,
        mode: FetchMode,
    ) -> Result<LazyValue, RuntimeError> {
        self.inner.get_data_sync(data_id, path, mode)
    }

    pub async fn dispose(&self) {
        self.inner.dispose_boxed().await
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl std::fmt::Debug for BoxBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxBridge")
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}
