//! Shared domain types for exprbox.
//!
//! This crate contains the types that cross every layer of the sandbox:
//! workflow data snapshots and data paths, values flowing out of an isolate,
//! bridge descriptors, configuration, the error taxonomy, and the wire
//! protocol spoken with the out-of-process runner.
//!
//! Zero infrastructure dependencies -- only serde, uuid and thiserror.

pub mod bridge;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod value;
