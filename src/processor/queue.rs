//! Multi-producer FIFO run-queue of ready tasks.
//!
//! One mutex-guarded deque plus a condvar; workers block on [`RunQueue::pop`]
//! until a context arrives or the queue closes. Admission order is total
//! within one processor: a task made ready before another is picked up no
//! later than it. Overload policy lives in the processor; the queue only
//! refuses pushes once closed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::{Condvar, Mutex, PoisonError};

use crate::sync::lock;
use crate::task::context::TaskContext;

struct Inner {
    ready: VecDeque<Arc<TaskContext>>,
    closed: bool,
}

pub(crate) struct RunQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    closed_hint: AtomicBool,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            closed_hint: AtomicBool::new(false),
        }
    }

    /// Enqueues a ready context at the tail; false once the queue closed.
    pub(crate) fn push(&self, ctx: Arc<TaskContext>) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return false;
            }
            inner.ready.push_back(ctx);
        }
        self.available.notify_one();
        true
    }

    /// Blocks until a context is available; `None` once closed and drained.
    pub(crate) fn pop(&self) -> Option<Arc<TaskContext>> {
        let mut inner = lock(&self.inner);
        loop {
            if let Some(ctx) = inner.ready.pop_front() {
                return Some(ctx);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Closes the queue and drops whatever is still enqueued.
    ///
    /// Idempotent. Contexts are dropped outside the lock: dropping a
    /// continuation releases guards that may re-enter this queue.
    pub(crate) fn close(&self) {
        let drained = {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return;
            }
            inner.closed = true;
            self.closed_hint.store(true, Ordering::Release);
            std::mem::take(&mut inner.ready)
        };
        self.available.notify_all();
        drop(drained);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed_hint.load(Ordering::Acquire)
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).ready.len()
    }
}
