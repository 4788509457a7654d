//! Per-call context threaded through every native function an isolate calls.
//!
//! Nothing here is global: each `evaluate` builds a fresh `CallScope` and
//! the lazy getters capture it explicitly.

use std::cell::RefCell;
use std::rc::Rc;

use boa_engine::{JsError, JsNativeError};
use exprbox_types::data::DataPath;
use exprbox_types::error::RuntimeError;
use exprbox_types::value::{FetchMode, LazyValue};

/// Synchronous host read, as seen from inside the isolate's thread.
pub trait DataAccess {
    fn fetch(&self, path: &DataPath, mode: FetchMode) -> Result<LazyValue, RuntimeError>;
}

/// First host-side failure raised during a call.
///
/// Script code can catch the JavaScript exception a trap throws; the slot
/// makes sure the host still reports the original failure.
#[derive(Debug, Clone, Default)]
pub struct FaultSlot(Rc<RefCell<Option<RuntimeError>>>);

impl FaultSlot {
    pub fn record(&self, err: RuntimeError) {
        let mut slot = self.0.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take(&self) -> Option<RuntimeError> {
        self.0.borrow_mut().take()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().take();
    }

    /// Record `err` and produce the exception to throw into script code.
    pub fn raise(&self, err: RuntimeError) -> JsError {
        let exception = JsNativeError::error().with_message(err.message.clone());
        self.record(err);
        exception.into()
    }
}

pub struct CallScope {
    access: Rc<dyn DataAccess>,
    fault: FaultSlot,
}

impl CallScope {
    pub fn new(access: Rc<dyn DataAccess>, fault: FaultSlot) -> Self {
        Self { access, fault }
    }

    pub fn fetch(&self, path: &DataPath, mode: FetchMode) -> Result<LazyValue, JsError> {
        self.access
            .fetch(path, mode)
            .map_err(|err| self.fault.raise(err))
    }
}
