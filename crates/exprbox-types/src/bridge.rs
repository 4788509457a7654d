//! Descriptors shared by every bridge backend.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::DataId;

/// Which isolation mechanism a bridge uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeKind {
    /// Long-lived engine heap on a dedicated thread. Unconfined.
    Isolate,
    /// Worker thread reached only through asynchronous messages. Unconfined.
    Worker,
    /// Out-of-process runner child with an OS-enforced address-space cap,
    /// CPU backstop and kill-on-timeout.
    #[default]
    Process,
    /// Fresh engine per call on the blocking pool. Unconfined, intended for tests.
    InProcess,
}

impl BridgeKind {
    /// Whether the backend enforces `memory_limit_mb` and can forcibly stop
    /// a timed-out execution. The in-process backends only bound loop
    /// iterations and recursion, and abandon a timed-out job instead of
    /// killing it.
    pub fn is_confined(&self) -> bool {
        matches!(self, BridgeKind::Process)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeKind::Isolate => "isolate",
            BridgeKind::Worker => "worker",
            BridgeKind::Process => "process",
            BridgeKind::InProcess => "in_process",
        }
    }
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolate" => Ok(BridgeKind::Isolate),
            "worker" => Ok(BridgeKind::Worker),
            "process" => Ok(BridgeKind::Process),
            "in_process" | "in-process" => Ok(BridgeKind::InProcess),
            other => Err(format!("unknown bridge backend '{other}'")),
        }
    }
}

/// Bridge lifecycle: `Uninitialized -> Ready -> (Executing <-> Ready)* -> Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Uninitialized,
    Ready,
    Executing,
    Disposed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Uninitialized => "uninitialized",
            BridgeState::Ready => "ready",
            BridgeState::Executing => "executing",
            BridgeState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// What a backend can guarantee.
///
/// Lazy proxies require synchronous host callback support; backends
/// without it degrade to eager full-context transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeCapabilities {
    /// The isolate can block on a host read mid-execution.
    pub synchronous_host_callback: bool,
    /// Allocation beyond the memory limit is stopped by the OS.
    pub hard_memory_limit: bool,
    /// A timed-out execution is stopped, not merely abandoned.
    pub forceful_cancellation: bool,
    /// The bridge is still usable after a timeout or memory kill.
    pub survives_timeout: bool,
}

/// One call into a bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    /// Compiled, already validated JavaScript expression.
    pub code: String,
    pub data_id: DataId,
    /// Overrides the bridge's configured timeout for this call only.
    pub timeout: Option<Duration>,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>, data_id: DataId) -> Self {
        Self {
            code: code.into(),
            data_id,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Per-call evaluation switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluateOptions {
    /// Bypass the external transform/validation step. Trusted expressions only.
    pub skip_transform: bool,
    /// Bypass both cache lookup and cache write.
    pub skip_cache: bool,
    /// Overrides the bridge timeout for this call only.
    pub timeout: Option<Duration>,
}
