//! Per-task scheduling state.
//!
//! A [`TaskContext`] owns the boxed continuation and a small atomic state
//! machine deciding who re-enqueues the task:
//!
//! ```text
//!   Waiting ──wake──► Queued ──worker──► Running ──Pending──► Waiting
//!                        ▲                  │ wake
//!                        └──── Notified ◄───┘
//! ```
//!
//! A wake that lands while the task is running flips it to `Notified`; the
//! worker observes that after the poll and reinjects the context into the
//! owning processor's run-queue, preserving FIFO admission. Tasks never
//! migrate between processors.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use tokio_util::sync::CancellationToken;

use crate::processor::TaskProcessor;
use crate::sync::lock;

const WAITING: u8 = 0;
const QUEUED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

pub(crate) struct TaskContext {
    name: Arc<str>,
    processor: Weak<TaskProcessor>,
    state: AtomicU8,
    started: AtomicBool,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    token: CancellationToken,
    critical: bool,
}

impl TaskContext {
    pub(crate) fn new(
        name: Arc<str>,
        processor: Weak<TaskProcessor>,
        token: CancellationToken,
        critical: bool,
    ) -> Self {
        Self {
            name,
            processor,
            state: AtomicU8::new(WAITING),
            started: AtomicBool::new(false),
            future: Mutex::new(None),
            token,
            critical,
        }
    }

    /// A context for a task that was rejected at admission and never runs.
    pub(crate) fn completed(name: Arc<str>, token: CancellationToken, critical: bool) -> Self {
        let ctx = Self::new(name, Weak::new(), token, critical);
        ctx.state.store(COMPLETE, Ordering::Release);
        ctx
    }

    pub(crate) fn bind(&self, future: BoxFuture<'static, ()>) {
        *lock(&self.future) = Some(future);
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_critical(&self) -> bool {
        self.critical
    }

    pub(crate) fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.state.load(Ordering::Acquire) == WAITING
    }

    /// Marks the context as enqueued; must precede the initial push.
    pub(crate) fn mark_queued(&self) {
        self.state.store(QUEUED, Ordering::Release);
    }

    /// Wake path: transitions the state machine and reinjects if needed.
    pub(crate) fn notify(self: &Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                WAITING => {
                    if self
                        .state
                        .compare_exchange(WAITING, QUEUED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        if let Some(processor) = self.processor.upgrade() {
                            processor.schedule_ready(Arc::clone(self));
                        }
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Queued, notified and complete tasks need no further action.
                _ => return,
            }
        }
    }

    /// Polls the continuation once on the calling worker thread.
    ///
    /// Returns true when the task completed and released its continuation.
    pub(crate) fn poll_once(self: &Arc<Self>) -> bool {
        self.state.store(RUNNING, Ordering::Release);
        self.started.store(true, Ordering::Release);

        let mut slot = lock(&self.future);
        let Some(future) = slot.as_mut() else {
            self.state.store(COMPLETE, Ordering::Release);
            return true;
        };

        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        let poll = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        match poll {
            Ok(Poll::Pending) => {
                drop(slot);
                if self
                    .state
                    .compare_exchange(RUNNING, WAITING, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Woken while running: reinject at the queue tail.
                    self.state.store(QUEUED, Ordering::Release);
                    if let Some(processor) = self.processor.upgrade() {
                        processor.schedule_ready(Arc::clone(self));
                    }
                }
                false
            }
            // A panic escaping the continuation wrapper is a runtime defect;
            // the continuation is dropped so its guards still release.
            Ok(Poll::Ready(())) | Err(_) => {
                *slot = None;
                drop(slot);
                self.state.store(COMPLETE, Ordering::Release);
                true
            }
        }
    }
}

impl ArcWake for TaskContext {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.notify();
    }
}
