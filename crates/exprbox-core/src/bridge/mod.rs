//! Isolation abstraction: one contract, several backends.
//!
//! A `Bridge` owns one isolated execution context, injects the runtime
//! globals into it, runs compiled expressions in it and relays the
//! isolate's data reads to the `DataStore`. Backends differ in what they
//! can guarantee (see `BridgeCapabilities`); the evaluator treats them all
//! alike.

pub mod box_bridge;
pub mod state;

pub use box_bridge::{BoxBridge, BridgeDyn, BridgeFactory};
pub use state::{ExecutionGuard, StateCell};

use std::future::Future;
use std::sync::Arc;

use exprbox_types::bridge::{BridgeCapabilities, BridgeKind, BridgeState, ExecuteRequest};
use exprbox_types::data::{DataId, DataPath};
use exprbox_types::error::RuntimeError;
use exprbox_types::value::{ExprValue, FetchMode, LazyValue};

use crate::store::DataStore;

/// Trait for isolation backends.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Not object-safe -- use [`BoxBridge`] for dynamic dispatch.
///
/// All methods take `&self`; backends keep their mutable state behind
/// interior mutability and serialize executions themselves.
pub trait Bridge: Send + Sync {
    fn kind(&self) -> BridgeKind;

    fn capabilities(&self) -> BridgeCapabilities;

    fn state(&self) -> BridgeState;

    /// Store that execution contexts for this bridge are registered in.
    fn data_store(&self) -> &Arc<DataStore>;

    /// Allocate the isolated context and inject the runtime globals.
    ///
    /// Calling it again on a ready bridge is a no-op.
    fn initialize(&self) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Run compiled code scoped to `request.data_id`.
    ///
    /// Timeouts and memory exhaustion reject with `TIMEOUT` / `MEMORY_LIMIT`.
    /// A bridge that cannot prove its context clean afterwards moves itself
    /// to `Disposed`.
    fn execute(
        &self,
        request: ExecuteRequest,
    ) -> impl Future<Output = Result<ExprValue, RuntimeError>> + Send;

    /// Asynchronous host read.
    fn get_data(
        &self,
        data_id: &DataId,
        path: &DataPath,
        mode: FetchMode,
    ) -> impl Future<Output = Result<LazyValue, RuntimeError>> + Send {
        let result = Bridge::get_data_sync(self, data_id, path, mode);
        async move { result }
    }

    /// Blocking host read backing the lazy proxies.
    fn get_data_sync(
        &self,
        data_id: &DataId,
        path: &DataPath,
        mode: FetchMode,
    ) -> Result<LazyValue, RuntimeError> {
        Bridge::data_store(self).get_data_sync(data_id, path, mode)
    }

    /// Terminal teardown. Idempotent.
    fn dispose(&self) -> impl Future<Output = ()> + Send;

    fn is_disposed(&self) -> bool {
        Bridge::state(self) == BridgeState::Disposed
    }
}
