//! Atomic bridge lifecycle shared by all backends.

use std::sync::atomic::{AtomicU8, Ordering};

use exprbox_types::bridge::BridgeState;
use exprbox_types::error::RuntimeError;

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const EXECUTING: u8 = 2;
const DISPOSED: u8 = 3;

fn decode(raw: u8) -> BridgeState {
    match raw {
        UNINITIALIZED => BridgeState::Uninitialized,
        READY => BridgeState::Ready,
        EXECUTING => BridgeState::Executing,
        _ => BridgeState::Disposed,
    }
}

/// Lifecycle cell enforcing `Uninitialized -> Ready -> (Executing <-> Ready)* -> Disposed`.
///
/// `Disposed` is terminal: every transition out of it fails.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(UNINITIALIZED))
    }

    pub fn get(&self) -> BridgeState {
        decode(self.0.load(Ordering::Acquire))
    }

    /// `Uninitialized -> Ready`. Already-ready is accepted.
    pub fn mark_ready(&self) -> Result<(), RuntimeError> {
        match self
            .0
            .compare_exchange(UNINITIALIZED, READY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(READY) | Err(EXECUTING) => Ok(()),
            Err(_) => Err(RuntimeError::disposed()),
        }
    }

    /// `Ready -> Executing`, returning a guard that moves back on drop.
    pub fn begin(&self) -> Result<ExecutionGuard<'_>, RuntimeError> {
        match self
            .0
            .compare_exchange(READY, EXECUTING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(ExecutionGuard {
                cell: self,
                armed: true,
            }),
            Err(UNINITIALIZED) => Err(RuntimeError::not_initialized()),
            Err(EXECUTING) => Err(RuntimeError::internal("bridge is already executing")),
            Err(_) => Err(RuntimeError::disposed()),
        }
    }

    /// Move to `Disposed`. Returns `false` if it already was.
    pub fn dispose(&self) -> bool {
        self.0.swap(DISPOSED, Ordering::AcqRel) != DISPOSED
    }
}

/// Held for the duration of one execution.
#[derive(Debug)]
pub struct ExecutionGuard<'a> {
    cell: &'a StateCell,
    armed: bool,
}

impl ExecutionGuard<'_> {
    /// The isolated context can no longer be trusted; the bridge becomes `Disposed`.
    pub fn lost(mut self) {
        self.armed = false;
        self.cell.dispose();
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            // Only Executing -> Ready; a concurrent dispose() wins.
            let _ = self.cell.0.compare_exchange(
                EXECUTING,
                READY,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}
