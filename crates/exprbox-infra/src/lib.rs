//! Infrastructure layer for exprbox.
//!
//! Contains the concrete isolation backends implementing the `Bridge`
//! trait from `exprbox-core`, all built on an embedded JavaScript engine
//! (`boa_engine`): the shared `JsIsolate`, the in-process, isolate-thread,
//! worker-thread and process backends, the runner loop executed by the
//! process backend's child, and config-file loading.

pub mod bridge;
pub mod config;
pub mod isolate;
pub mod process;
