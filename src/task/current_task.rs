//! # The coroutine executing on the current worker thread.
//!
//! Workers install a [`CurrentTask`] snapshot around every poll; suspension
//! primitives read it to find the task's cancellation token, criticality and
//! the owning processor's pools. Outside a worker thread there is no current
//! task and suspension primitives fail with
//! [`TaskError::WrongState`](crate::TaskError::WrongState).

use std::cell::RefCell;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::processor::TaskProcessor;

#[derive(Clone)]
pub(crate) struct CurrentTask {
    pub(crate) token: CancellationToken,
    pub(crate) critical: bool,
    pub(crate) processor: Arc<TaskProcessor>,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentTask>> = const { RefCell::new(None) };
}

pub(crate) struct CurrentTaskGuard {
    prev: Option<CurrentTask>,
}

pub(crate) fn enter(current: CurrentTask) -> CurrentTaskGuard {
    let prev = CURRENT.with(|slot| slot.borrow_mut().replace(current));
    CurrentTaskGuard { prev }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|slot| *slot.borrow_mut() = prev);
    }
}

pub(crate) fn current() -> Option<CurrentTask> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// True when a suspension point of the current task must observe
/// cancellation: the flag is set and the task is not critical.
pub(crate) fn suspension_cancelled() -> bool {
    current().map_or(false, |c| !c.critical && c.token.is_cancelled())
}

/// True once cancellation has been requested for the current task.
///
/// Sticky: never resets for the lifetime of the task.
pub fn is_cancellation_requested() -> bool {
    current().map_or(false, |c| c.token.is_cancelled())
}

/// Explicit cancellation checkpoint.
///
/// Observes the flag even for critical tasks; this is the only place a
/// critical task acts on cancellation.
pub fn checkpoint() -> Result<(), TaskError> {
    if is_cancellation_requested() {
        Err(TaskError::Cancelled)
    } else {
        Ok(())
    }
}
