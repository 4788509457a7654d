//! Host side of the process backend.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use exprbox_core::bridge::{Bridge, ExecutionGuard, StateCell};
use exprbox_core::store::DataStore;
use exprbox_types::bridge::{BridgeCapabilities, BridgeKind, BridgeState, ExecuteRequest};
use exprbox_types::config::{BridgeConfig, RunnerSettings};
use exprbox_types::data::{DataId, ExecutionMeta};
use exprbox_types::error::RuntimeError;
use exprbox_types::protocol::{HostMessage, RunnerMessage};
use exprbox_types::value::ExprValue;
#[cfg(unix)]
use libc::{SIGABRT, SIGXCPU};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::RUNNER_SUBCOMMAND;

/// Upper bound for spawn + `Init` + `Ready`.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a dying child gets to exit on its own before it is killed.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ProcessBridge {
    config: BridgeConfig,
    runner: RunnerSettings,
    store: Arc<DataStore>,
    state: StateCell,
    child: Mutex<Option<RunnerProcess>>,
}

impl ProcessBridge {
    pub fn new(config: BridgeConfig, runner: RunnerSettings, store: Arc<DataStore>) -> Self {
        Self {
            config,
            runner,
            store,
            state: StateCell::new(),
            child: Mutex::new(None),
        }
    }

    async fn spawn_runner(&self) -> Result<RunnerProcess, RuntimeError> {
        let (program, args) = resolve_command(&self.runner)
            .map_err(|e| RuntimeError::internal(format!("cannot locate runner: {e:#}")))?;
        match tokio::time::timeout(
            STARTUP_TIMEOUT,
            RunnerProcess::spawn(&program, &args, &self.config),
        )
        .await
        {
            Ok(Ok(process)) => Ok(process),
            Ok(Err(e)) => Err(RuntimeError::internal(format!("failed to start runner: {e:#}"))),
            Err(_) => Err(RuntimeError::internal(format!(
                "runner did not become ready within {}s",
                STARTUP_TIMEOUT.as_secs()
            ))),
        }
    }

    /// Put a fresh child in `slot`; without one the bridge is lost.
    async fn respawn(&self, slot: &mut Option<RunnerProcess>, guard: ExecutionGuard<'_>) {
        match self.spawn_runner().await {
            Ok(process) => {
                tracing::debug!(backend = "process", pid = ?process.child.id(), "runner respawned");
                *slot = Some(process);
            }
            Err(err) => {
                tracing::error!(backend = "process", error = %err, "failed to respawn runner");
                guard.lost();
            }
        }
    }
}

impl Bridge for ProcessBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Process
    }

    fn capabilities(&self) -> BridgeCapabilities {
        BridgeCapabilities {
            synchronous_host_callback: true,
            hard_memory_limit: true,
            forceful_cancellation: true,
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
        let mut slot = self.child.lock().await;
        match self.state.get() {
            BridgeState::Ready | BridgeState::Executing => return Ok(()),
            BridgeState::Disposed => return Err(RuntimeError::disposed()),
            BridgeState::Uninitialized => {}
        }
        let process = self.spawn_runner().await?;
        tracing::debug!(backend = "process", pid = ?process.child.id(), "bridge ready");
        *slot = Some(process);
        self.state.mark_ready()
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExprValue, RuntimeError> {
        let mut slot = self.child.lock().await;
        let guard = self.state.begin()?;
        let meta = self.store.meta(&request.data_id)?;
        let timeout = request.timeout.unwrap_or_else(|| self.config.timeout());
        let Some(process) = slot.as_mut() else {
            return Err(RuntimeError::not_initialized());
        };
        let started = Instant::now();
        let data_id = request.data_id;

        let outcome = tokio::time::timeout(
            timeout,
            process.converse(&self.store, request.code, data_id, meta, timeout),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(result)) => {
                tracing::debug!(backend = "process", data_id = %data_id, elapsed_ms, "execution finished");
                result
            }
            Ok(Err(failure)) => {
                let err = match slot.take() {
                    Some(dead) => dead.reap(&self.config, timeout).await,
                    None => RuntimeError::bridge_lost("runner vanished"),
                };
                tracing::warn!(backend = "process", data_id = %data_id, elapsed_ms, error = %failure, code = %err.code, "runner died mid-execution");
                self.respawn(&mut slot, guard).await;
                Err(err)
            }
            Err(_) => {
                tracing::warn!(backend = "process", data_id = %data_id, elapsed_ms, "execution timed out; killing runner");
                if let Some(mut stale) = slot.take() {
                    stale.kill().await;
                }
                self.respawn(&mut slot, guard).await;
                Err(RuntimeError::timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn dispose(&self) {
        if self.state.dispose() {
            if let Some(mut process) = self.child.lock().await.take() {
                process.shutdown().await;
            }
            tracing::debug!(backend = "process", "bridge disposed");
        }
    }
}

/// Program and arguments used to launch the runner.
fn resolve_command(settings: &RunnerSettings) -> anyhow::Result<(PathBuf, Vec<String>)> {
    let program = match &settings.program {
        Some(program) => program.clone(),
        None => std::env::current_exe().context("failed to get current executable path")?,
    };
    let args = if settings.args.is_empty() {
        vec![RUNNER_SUBCOMMAND.to_string()]
    } else {
        settings.args.clone()
    };
    Ok((program, args))
}

struct RunnerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Option<ChildStderr>,
}

impl RunnerProcess {
    async fn spawn(program: &Path, args: &[String], config: &BridgeConfig) -> anyhow::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.display()))?;

        let stdin = child.stdin.take().context("runner stdin unavailable")?;
        let stdout = child.stdout.take().context("runner stdout unavailable")?;
        let stderr = child.stderr.take();
        let mut process = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr,
        };

        process
            .send(&HostMessage::Init {
                config: config.clone(),
            })
            .await?;
        match process.recv().await? {
            Some(RunnerMessage::Ready) => Ok(process),
            Some(other) => anyhow::bail!("runner answered init with {other:?}"),
            None => anyhow::bail!("runner exited before becoming ready"),
        }
    }

    async fn send(&mut self, message: &HostMessage) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<Option<RunnerMessage>> {
        match self.stdout.next_line().await? {
            Some(line) => Ok(Some(
                serde_json::from_str(&line).with_context(|| format!("malformed runner message: {line}"))?,
            )),
            None => Ok(None),
        }
    }

    /// Drive one execution, answering the runner's data requests from `store`.
    ///
    /// The outer error means the pipe broke; the inner result is the
    /// runner's verdict.
    async fn converse(
        &mut self,
        store: &DataStore,
        code: String,
        data_id: DataId,
        meta: ExecutionMeta,
        timeout: Duration,
    ) -> anyhow::Result<Result<ExprValue, RuntimeError>> {
        self.send(&HostMessage::Execute {
            code,
            data_id,
            meta,
            timeout_ms: timeout.as_millis() as u64,
        })
        .await?;
        loop {
            match self.recv().await? {
                Some(RunnerMessage::DataRequest {
                    data_id: requested,
                    path,
                    mode,
                }) => {
                    let result = if requested == data_id {
                        store.get_data_sync(&requested, &path, mode)
                    } else {
                        Err(RuntimeError::security(
                            "runner requested data outside its execution",
                        ))
                    };
                    self.send(&HostMessage::DataReply { result }).await?;
                }
                Some(RunnerMessage::Result { outcome }) => return Ok(outcome),
                Some(RunnerMessage::Ready) => anyhow::bail!("unexpected ready mid-execution"),
                None => anyhow::bail!("runner closed its output"),
            }
        }
    }

    /// Collect a child that broke the pipe and decide why it died.
    async fn reap(mut self, config: &BridgeConfig, timeout: Duration) -> RuntimeError {
        let status = match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => {
                self.kill().await;
                None
            }
        };
        let mut diagnostics = String::new();
        if let Some(mut stderr) = self.stderr.take() {
            let _ = tokio::time::timeout(
                Duration::from_millis(200),
                stderr.read_to_string(&mut diagnostics),
            )
            .await;
        }

        classify_exit(status, &diagnostics, config, timeout)
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "runner already gone");
        }
    }

    async fn shutdown(&mut self) {
        let _ = self.send(&HostMessage::Shutdown).await;
        if tokio::time::timeout(REAP_TIMEOUT, self.child.wait())
            .await
            .is_err()
        {
            self.kill().await;
        }
    }
}

/// Map a dead runner's exit to an error code.
///
/// `SIGABRT` or allocator text on stderr is the address-space cap tripping;
/// `SIGXCPU` is the CPU backstop firing before the host's own timer.
fn classify_exit(
    status: Option<ExitStatus>,
    diagnostics: &str,
    config: &BridgeConfig,
    timeout: Duration,
) -> RuntimeError {
    let signal = status.as_ref().and_then(exit_signal);
    if signal == Some(SIGXCPU) {
        return RuntimeError::timeout(timeout.as_millis() as u64);
    }
    if signal == Some(SIGABRT)
        || diagnostics.contains("memory allocation")
        || diagnostics.contains("out of memory")
    {
        return RuntimeError::memory_limit(format!(
            "expression exceeded the {} MB memory limit",
            config.memory_limit_mb
        ));
    }
    let status = status.map_or_else(|| "unknown status".to_string(), |s| s.to_string());
    RuntimeError::bridge_lost(format!("runner exited unexpectedly ({status})"))
}

#[cfg(not(unix))]
const SIGABRT: i32 = 6;
#[cfg(not(unix))]
const SIGXCPU: i32 = 24;

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
