//! A `JsIsolate` pinned to its own OS thread.
//!
//! The engine is `!Send`, so the thread owns it for its whole life and jobs
//! arrive over a channel. Dropping the handle closes the channel; the thread
//! exits once its current job (bounded by the loop limit) returns.
//!
//! A run that outlives its timeout is abandoned, not interrupted: the thread
//! keeps executing it until the loop or recursion limit trips.

use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use exprbox_types::config::BridgeConfig;
use exprbox_types::data::ExecutionMeta;
use exprbox_types::error::RuntimeError;
use exprbox_types::value::ExprValue;
use tokio::sync::oneshot;
use tokio::time::error::Elapsed;

use super::HostAccess;
use crate::isolate::{DataAccess, JsIsolate};

struct Job {
    code: String,
    meta: ExecutionMeta,
    access: HostAccess,
    reply: oneshot::Sender<Result<ExprValue, RuntimeError>>,
}

pub(crate) struct IsolateThread {
    jobs: mpsc::Sender<Job>,
}

impl IsolateThread {
    /// Start the thread and wait until its isolate is built.
    pub async fn spawn(name: &str, config: &BridgeConfig) -> Result<Self, RuntimeError> {
        let (jobs, inbox) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let config = config.clone();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut isolate = match JsIsolate::new(&config) {
                    Ok(isolate) => {
                        let _ = ready_tx.send(Ok(()));
                        isolate
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                while let Ok(job) = inbox.recv() {
                    let access: Rc<dyn DataAccess> = Rc::new(job.access);
                    let result = isolate.evaluate(&job.code, &job.meta, access);
                    // The caller may have timed out and gone away.
                    let _ = job.reply.send(result);
                }
            })
            .map_err(|e| RuntimeError::internal(format!("failed to spawn isolate thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| RuntimeError::bridge_lost("isolate thread exited during startup"))??;
        Ok(Self { jobs })
    }

    /// Hand one job to the thread and wait at most `timeout` for the answer.
    ///
    /// The outer `Err` means the deadline passed; the thread is then still
    /// busy and must not be trusted with further jobs.
    pub async fn run(
        &self,
        code: String,
        meta: ExecutionMeta,
        access: HostAccess,
        timeout: Duration,
    ) -> Result<Result<ExprValue, RuntimeError>, Elapsed> {
        let (reply, outcome) = oneshot::channel();
        let job = Job {
            code,
            meta,
            access,
            reply,
        };
        if self.jobs.send(job).is_err() {
            return Ok(Err(RuntimeError::bridge_lost("isolate thread is gone")));
        }
        match tokio::time::timeout(timeout, outcome).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Ok(Err(RuntimeError::bridge_lost(
                "isolate thread stopped mid-execution",
            ))),
            Err(elapsed) => Err(elapsed),
        }
    }
}
