//! Newline-delimited JSON protocol between the process bridge and its runner.
//!
//! One JSON document per line in each direction. The host drives the
//! conversation; while an `Execute` is in flight the runner may interleave
//! any number of `DataRequest`s, each answered by exactly one `DataReply`,
//! before it sends the terminating `Result`.

use serde::{Deserialize, Serialize};

use crate::config::BridgeConfig;
use crate::data::{DataId, DataPath, ExecutionMeta};
use crate::error::RuntimeError;
use crate::value::{ExprValue, FetchMode, LazyValue};

/// Messages written by the host to the runner's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// First message after spawn. The runner answers with `Ready`.
    Init { config: BridgeConfig },
    Execute {
        code: String,
        data_id: DataId,
        meta: ExecutionMeta,
        /// Effective wall-clock budget; the runner arms its CPU backstop from it.
        timeout_ms: u64,
    },
    DataReply { result: Result<LazyValue, RuntimeError> },
    Shutdown,
}

/// Messages written by the runner to its stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerMessage {
    Ready,
    DataRequest {
        data_id: DataId,
        path: DataPath,
        mode: FetchMode,
    },
    Result { outcome: Result<ExprValue, RuntimeError> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_single_line_json() {
        let msg = HostMessage::Execute {
            code: "$json.a\n+ 1".into(),
            data_id: DataId::new(),
            meta: ExecutionMeta::default(),
            timeout_ms: 5_000,
        };
        let line = serde_json::to_string(&msg).expect("serialize");
        assert!(!line.contains('\n'));
        assert!(line.contains("\"type\":\"execute\""));
    }

    #[test]
    fn data_request_carries_scoped_path() {
        let msg = RunnerMessage::DataRequest {
            data_id: DataId::new(),
            path: DataPath::input().index(0).key("name"),
            mode: FetchMode::Shallow,
        };
        let line = serde_json::to_string(&msg).expect("serialize");
        let back: RunnerMessage = serde_json::from_str(&line).expect("deserialize");
        assert_eq!(back, msg);
    }

    #[test]
    fn error_outcome_survives_the_pipe() {
        let msg = RunnerMessage::Result {
            outcome: Err(RuntimeError::security("eval is not allowed")),
        };
        let line = serde_json::to_string(&msg).expect("serialize");
        match serde_json::from_str::<RunnerMessage>(&line).expect("deserialize") {
            RunnerMessage::Result { outcome: Err(err) } => {
                assert_eq!(err.message, "eval is not allowed");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
