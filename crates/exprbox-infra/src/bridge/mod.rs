//! In-process `Bridge` backends built on [`JsIsolate`](crate::isolate::JsIsolate).
//!
//! | Backend | Engine lifetime | Host reads | On timeout |
//! |---|---|---|---|
//! | `InProcessBridge` | fresh per call | synchronous, lazy | abandoned, stays `Ready` |
//! | `IsolateBridge` | one per bridge | synchronous, lazy | `Disposed` |
//! | `WorkerBridge` | one per worker | eager snapshot | worker respawned |
//!
//! None of these can cap heap growth or stop a runaway execution: a timed-out
//! job is abandoned and its thread keeps running until the iteration budget
//! trips. They are fallbacks for tests and trusted input, and
//! [`build_bridge`](crate::config::build_bridge) refuses them unless
//! `allow_unconfined` is set. The out-of-process backend lives in
//! [`crate::process`].

mod in_process;
mod isolate;
mod thread;
mod worker;

pub use in_process::InProcessBridge;
pub use isolate::IsolateBridge;
pub use worker::WorkerBridge;

use std::sync::Arc;

use exprbox_core::store::{DataStore, WorkflowDataProxy};
use exprbox_types::data::{DataId, DataPath};
use exprbox_types::error::RuntimeError;
use exprbox_types::value::{FetchMode, LazyValue};

use crate::isolate::DataAccess;

/// Where an isolate's reads are answered from.
pub(crate) enum HostAccess {
    /// Blocking call back into the shared store, per read.
    Store { store: Arc<DataStore>, data_id: DataId },
    /// A snapshot transferred with the job.
    Snapshot(WorkflowDataProxy),
}

impl DataAccess for HostAccess {
    fn fetch(&self, path: &DataPath, mode: FetchMode) -> Result<LazyValue, RuntimeError> {
        match self {
            HostAccess::Store { store, data_id } => store.get_data_sync(data_id, path, mode),
            HostAccess::Snapshot(proxy) => Ok(proxy.resolve(path, mode)),
        }
    }
}
