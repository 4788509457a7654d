//! End-to-end checks of the process backend against the real `exprbox runner` child.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use exprbox_core::bridge::BoxBridge;
use exprbox_core::evaluator::{Evaluator, EvaluatorConfig};
use exprbox_core::store::{DataStore, RecordingListener};
use exprbox_core::tournament::PatternTournament;
use exprbox_infra::config::{bridge_factory, build_bridge};
use exprbox_infra::process::ProcessBridge;
use exprbox_types::bridge::{BridgeKind, BridgeState, EvaluateOptions, ExecuteRequest};
use exprbox_types::config::{BridgeConfig, RunnerSettings, SandboxConfig};
use exprbox_types::data::WorkflowData;
use exprbox_types::error::{ExpressionErrorKind, RuntimeErrorCode};
use exprbox_types::value::ExprValue;
use serde_json::json;

fn runner() -> RunnerSettings {
    RunnerSettings {
        program: Some(PathBuf::from(env!("CARGO_BIN_EXE_exprbox"))),
        args: vec!["runner".to_string()],
    }
}

async fn start(config: BridgeConfig) -> (BoxBridge, Arc<DataStore>, Arc<RecordingListener>) {
    let listener = Arc::new(RecordingListener::new());
    let store = Arc::new(DataStore::with_listener(listener.clone()));
    let bridge = BoxBridge::new(ProcessBridge::new(config, runner(), Arc::clone(&store)));
    bridge.initialize().await.unwrap();
    (bridge, store, listener)
}

#[tokio::test]
async fn lazy_reads_cross_the_pipe() {
    let (bridge, store, listener) = start(BridgeConfig::default()).await;
    let data = WorkflowData::new(json!({
        "a": {"b": 5},
        "big": {"payload": "x".repeat(4096)},
    }));
    let lease = store.register(Arc::new(data));

    let value = bridge
        .execute(ExecuteRequest::new("$json.a.b * 2", lease.id()))
        .await
        .unwrap();
    assert_eq!(value, ExprValue::Json(json!(10)));

    let paths = listener.paths();
    assert!(paths.iter().any(|p| p.ends_with("a.b")), "{paths:?}");
    assert!(!paths.iter().any(|p| p.contains("big")), "{paths:?}");
    assert_eq!(listener.snapshots(), 0);

    bridge.dispose().await;
    assert_eq!(bridge.state(), BridgeState::Disposed);
}

#[tokio::test]
async fn timeout_kills_and_respawns_runner() {
    let config = BridgeConfig {
        timeout_ms: 200,
        max_loop_iterations: u64::MAX,
        ..BridgeConfig::default()
    };
    let (bridge, store, _) = start(config).await;
    let lease = store.register(Arc::new(WorkflowData::new(json!({"n": 3}))));

    let err = bridge
        .execute(ExecuteRequest::new("(() => { while (true) {} })()", lease.id()))
        .await
        .unwrap_err();
    assert_eq!(err.code, RuntimeErrorCode::Timeout);
    assert_eq!(bridge.state(), BridgeState::Ready);

    let value = bridge
        .execute(ExecuteRequest::new("$json.n + 1", lease.id()))
        .await
        .unwrap();
    assert_eq!(value, ExprValue::Json(json!(4)));
    bridge.dispose().await;
}

#[tokio::test]
async fn per_call_timeout_overrides_config() {
    let config = BridgeConfig {
        max_loop_iterations: u64::MAX,
        ..BridgeConfig::default()
    };
    let (bridge, store, _) = start(config).await;
    let lease = store.register(Arc::new(WorkflowData::default()));

    let err = bridge
        .execute(
            ExecuteRequest::new("(() => { for (;;) {} })()", lease.id())
                .with_timeout(Some(Duration::from_millis(150))),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, RuntimeErrorCode::Timeout);
    bridge.dispose().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn runaway_allocation_does_not_take_down_the_bridge() {
    let config = BridgeConfig {
        memory_limit_mb: 32,
        timeout_ms: 60_000,
        ..BridgeConfig::default()
    };
    let (bridge, store, _) = start(config).await;
    let lease = store.register(Arc::new(WorkflowData::default()));

    let grow = "(() => { const a = []; for (let i = 0; i < 5000000; i++) { a.push('x'.repeat(256) + i); } return a.length; })()";
    let err = bridge
        .execute(ExecuteRequest::new(grow, lease.id()))
        .await
        .unwrap_err();
    assert_eq!(err.code, RuntimeErrorCode::MemoryLimit, "{err:?}");
    assert_eq!(bridge.state(), BridgeState::Ready);

    let value = bridge
        .execute(ExecuteRequest::new("1 + 1", lease.id()))
        .await
        .unwrap();
    assert_eq!(value, ExprValue::Json(json!(2)));
    bridge.dispose().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn evaluator_reports_memory_limit_from_process_backend() {
    let config = SandboxConfig {
        runner: runner(),
        bridge: BridgeConfig {
            memory_limit_mb: 32,
            timeout_ms: 60_000,
            ..BridgeConfig::default()
        },
        ..SandboxConfig::default()
    };
    assert_eq!(config.backend, BridgeKind::Process);
    let store = Arc::new(DataStore::new());
    let tournament = PatternTournament::new(config.bridge.max_code_length).unwrap();
    let evaluator = Evaluator::new(
        EvaluatorConfig::new(build_bridge(config.backend, &config, Arc::clone(&store)).unwrap())
            .with_factory(bridge_factory(config.clone(), store).unwrap())
            .with_tournament(Arc::new(tournament)),
    );
    evaluator.initialize().await.unwrap();

    let grow = "{{ (() => { const a = []; for (let i = 0; i < 5000000; i++) { a.push('x'.repeat(256) + i); } return a.length; })() }}";
    let err = evaluator
        .evaluate(grow, WorkflowData::default(), &EvaluateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ExpressionErrorKind::MemoryLimit, "{err:?}");

    let value = evaluator
        .evaluate("{{ 6 * 7 }}", WorkflowData::default(), &EvaluateOptions::default())
        .await
        .unwrap();
    assert_eq!(value, ExprValue::Json(json!(42)));
    evaluator.dispose().await;
}

fn exprbox() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_exprbox"));
    cmd.env("EXPRBOX_CONFIG", "/nonexistent/exprbox.toml");
    cmd
}

#[test]
fn cli_eval_over_process_backend() {
    let tmp = tempfile::TempDir::new().unwrap();
    let data = tmp.path().join("item.json");
    std::fs::write(&data, r#"{"price": 4, "qty": 3}"#).unwrap();

    let output = exprbox()
        .args(["--json", "eval", "--backend", "process", "--data"])
        .arg(&data)
        .arg("{{ $json.price * $json.qty }}")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let out: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(out["ok"], json!(true));
    assert_eq!(out["value"], json!(12));
}

#[test]
fn cli_eval_reports_typed_error() {
    let output = exprbox()
        .args(["--json", "eval", "{{ this.constructor }}"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let out: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(out["ok"], json!(false));
    assert_eq!(out["error"]["kind"], json!("security_violation"));
}

#[test]
fn cli_refuses_unconfined_backend_without_opt_in() {
    let output = exprbox()
        .args(["eval", "--backend", "isolate", "{{ 1 + 1 }}"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("allow_unconfined"), "{stderr}");

    let output = exprbox()
        .args(["--json", "eval", "--backend", "isolate", "--allow-unconfined", "{{ 1 + 1 }}"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let out: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(out["value"], json!(2));
}

#[test]
fn cli_check_rejects_escape_hatch() {
    let output = exprbox().args(["check", "{{ this.x }}"]).output().unwrap();
    assert!(!output.status.success());

    let output = exprbox().args(["check", "{{ $json.x }}"]).output().unwrap();
    assert!(output.status.success());
}
