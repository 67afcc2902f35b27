//! # Task handles: join, result retrieval, cancellation, detach.
//!
//! A [`Task<T>`] is the joiner's view of a scheduled coroutine. The result
//! slot holds a value, an error, or nothing yet; waiting on it is a
//! suspension point for coroutines and a blocking wait for plain threads
//! (the manager's boot thread joins this way).
//!
//! Cancellation is cooperative and sticky: [`Task::request_cancel`] sets the
//! flag, the target observes it at its next suspension point. Critical tasks
//! only observe it at explicit [`current_task::checkpoint`] calls.

pub(crate) mod context;
pub mod current_task;
mod deadline;
mod suspend;

pub use deadline::Deadline;
pub use suspend::{sleep, sleep_until, yield_now};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use futures::future::BoxFuture;

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::pools::TimerRegistration;
use crate::sync::lock;
use crate::task::context::TaskContext;

/// Lifecycle stage of a task as seen through its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, not yet polled.
    New,
    /// Queued or executing on a worker.
    Running,
    /// Parked at a suspension point.
    Suspended,
    /// Finished with a value.
    Completed,
    /// Finished by cancellation.
    Cancelled,
    /// Finished with an error or a panic.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompletionKind {
    Completed,
    Cancelled,
    Failed,
}

impl From<CompletionKind> for TaskStatus {
    fn from(kind: CompletionKind) -> Self {
        match kind {
            CompletionKind::Completed => TaskStatus::Completed,
            CompletionKind::Cancelled => TaskStatus::Cancelled,
            CompletionKind::Failed => TaskStatus::Failed,
        }
    }
}

struct Slot<T> {
    result: Option<Result<T, TaskError>>,
    kind: Option<CompletionKind>,
    wakers: Vec<Waker>,
}

/// Result slot shared between the running coroutine and its joiner.
pub(crate) struct TaskShared<T> {
    name: Arc<str>,
    bus: Bus,
    slot: Mutex<Slot<T>>,
    done: Condvar,
    complete: AtomicBool,
    detached: AtomicBool,
}

impl<T> TaskShared<T> {
    pub(crate) fn new(name: Arc<str>, bus: Bus) -> Self {
        Self {
            name,
            bus,
            slot: Mutex::new(Slot {
                result: None,
                kind: None,
                wakers: Vec::new(),
            }),
            done: Condvar::new(),
            complete: AtomicBool::new(false),
            detached: AtomicBool::new(false),
        }
    }

    /// Stores the result; first caller wins, later calls are no-ops.
    pub(crate) fn complete(&self, result: Result<T, TaskError>) {
        let wakers = {
            let mut slot = lock(&self.slot);
            if slot.kind.is_some() {
                return;
            }
            let kind = match &result {
                Ok(_) => CompletionKind::Completed,
                Err(TaskError::Cancelled) => CompletionKind::Cancelled,
                Err(_) => CompletionKind::Failed,
            };
            if self.detached.load(Ordering::Acquire) {
                if let Err(err) = &result {
                    if !err.is_cancellation() {
                        self.publish_detached_failure(err);
                    }
                }
            }
            slot.kind = Some(kind);
            slot.result = Some(result);
            self.complete.store(true, Ordering::Release);
            std::mem::take(&mut slot.wakers)
        };
        self.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    fn kind(&self) -> Option<CompletionKind> {
        lock(&self.slot).kind
    }

    /// Registers a waker unless the slot already completed.
    ///
    /// Returns true when the slot is complete and no registration happened.
    fn add_waker(&self, waker: &Waker) -> bool {
        let mut slot = lock(&self.slot);
        if slot.kind.is_some() {
            return true;
        }
        if !slot.wakers.iter().any(|w| w.will_wake(waker)) {
            slot.wakers.push(waker.clone());
        }
        false
    }

    fn take_result(&self) -> Option<Result<T, TaskError>> {
        lock(&self.slot).result.take()
    }

    fn publish_detached_failure(&self, err: &TaskError) {
        self.bus.publish(
            Event::now(EventKind::TaskFailed)
                .with_task(self.name.as_ref())
                .with_error(err.to_string()),
        );
    }
}

/// Handle to a scheduled coroutine with result storage and join primitives.
///
/// Dropping a handle without [`Task::detach`] or consuming the result
/// requests cancellation of the coroutine; the coroutine itself keeps
/// running until it observes the flag.
pub struct Task<T> {
    shared: Arc<TaskShared<T>>,
    ctx: Arc<TaskContext>,
    consumed: bool,
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn new(shared: Arc<TaskShared<T>>, ctx: Arc<TaskContext>) -> Self {
        Self {
            shared,
            ctx,
            consumed: false,
        }
    }

    /// Task name given at spawn.
    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// False once the result was consumed.
    pub fn is_valid(&self) -> bool {
        !self.consumed
    }

    /// Current lifecycle stage.
    pub fn status(&self) -> TaskStatus {
        if let Some(kind) = self.shared.kind() {
            return kind.into();
        }
        if !self.ctx.has_started() {
            TaskStatus::New
        } else if self.ctx.is_suspended() {
            TaskStatus::Suspended
        } else {
            TaskStatus::Running
        }
    }

    /// True once the coroutine finished.
    pub fn is_finished(&self) -> bool {
        self.shared.is_complete()
    }

    /// Suspends the caller until the task completes or is cancelled.
    pub async fn wait(&self) -> Result<(), TaskError> {
        self.wait_until(Deadline::unreachable()).await
    }

    /// [`Task::wait`] bounded by a deadline.
    ///
    /// Returns [`TaskError::DeadlineExceeded`] when the deadline is reached
    /// first; the target task keeps running.
    pub async fn wait_until(&self, deadline: Deadline) -> Result<(), TaskError> {
        WaitFuture {
            shared: &self.shared,
            deadline,
            cancel: None,
            timer: None,
        }
        .await
    }

    /// Waits for completion, then moves the result out.
    ///
    /// Fails with [`TaskError::WrongState`] when the result was already
    /// consumed.
    pub async fn get(&mut self) -> Result<T, TaskError> {
        if self.consumed {
            return Err(TaskError::WrongState);
        }
        self.wait().await?;
        self.consume()
    }

    /// Blocking [`Task::wait`] for non-coroutine threads.
    pub fn block_wait(&self) {
        let mut slot = self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
        while slot.kind.is_none() {
            slot = self
                .shared
                .done
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocking [`Task::get`] for non-coroutine threads.
    pub fn block_get(&mut self) -> Result<T, TaskError> {
        if self.consumed {
            return Err(TaskError::WrongState);
        }
        self.block_wait();
        self.consume()
    }

    /// Releases joiner ownership; the task still runs to completion.
    ///
    /// A detached task that fails publishes a
    /// [`TaskFailed`](crate::EventKind::TaskFailed) event and drops the error.
    pub fn detach(mut self) {
        self.consumed = true;
        self.shared.detached.store(true, Ordering::Release);
        if self.shared.is_complete() {
            if let Some(Err(err)) = self.shared.take_result() {
                if !err.is_cancellation() {
                    self.shared.publish_detached_failure(&err);
                }
            }
        }
    }

    /// Sets the sticky cancellation flag; delivered at the target's next
    /// suspension point.
    pub fn request_cancel(&self) {
        self.ctx.token().cancel();
    }

    /// [`Task::request_cancel`] plus [`Task::wait`].
    pub async fn sync_cancel(&self) -> Result<(), TaskError> {
        self.request_cancel();
        self.wait().await
    }

    fn consume(&mut self) -> Result<T, TaskError> {
        match self.shared.take_result() {
            Some(result) => {
                self.consumed = true;
                result
            }
            None => Err(TaskError::WrongState),
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.consumed && !self.shared.is_complete() {
            self.ctx.token().cancel();
        }
    }
}

struct WaitFuture<'a, T> {
    shared: &'a Arc<TaskShared<T>>,
    deadline: Deadline,
    cancel: Option<BoxFuture<'static, ()>>,
    timer: Option<TimerRegistration>,
}

impl<T> Future for WaitFuture<'_, T> {
    type Output = Result<(), TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.shared.is_complete() {
            return Poll::Ready(Ok(()));
        }
        let current = current_task::current();
        if let Some(current) = &current {
            if !current.critical {
                let cancel = this
                    .cancel
                    .get_or_insert_with(|| Box::pin(current.token.clone().cancelled_owned()));
                if cancel.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(Err(TaskError::Cancelled));
                }
            }
        }
        if this.deadline.is_reached() {
            return Poll::Ready(Err(TaskError::DeadlineExceeded));
        }
        if this.shared.add_waker(cx.waker()) {
            return Poll::Ready(Ok(()));
        }
        if let Some(when) = this.deadline.instant() {
            if this.timer.is_none() {
                let Some(current) = current else {
                    return Poll::Ready(Err(TaskError::WrongState));
                };
                this.timer = Some(
                    current
                        .processor
                        .pools()
                        .event_pool()
                        .register_timer(when, cx.waker().clone()),
                );
            }
        }
        Poll::Pending
    }
}
