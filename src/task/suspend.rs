//! # Suspension primitives.
//!
//! The only ways a coroutine yields its worker thread: explicit yield,
//! deadline sleep, joining another task, or waiting on a component inside a
//! factory. There are no implicit yields; CPU-bound code holds its worker
//! until it calls one of these.
//!
//! Every primitive observes the current task's cancellation flag (critical
//! tasks excepted, they use [`checkpoint`](crate::current_task::checkpoint))
//! and returns `Err(TaskError::Cancelled)` instead of suspending once it is
//! set.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::TaskError;
use crate::pools::TimerRegistration;
use crate::task::current_task;
use crate::task::deadline::Deadline;

/// Re-enqueues the current task at the tail of its processor's run-queue.
pub async fn yield_now() -> Result<(), TaskError> {
    YieldNow { yielded: false }.await
}

struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = Result<(), TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if current_task::suspension_cancelled() {
            return Poll::Ready(Err(TaskError::Cancelled));
        }
        if self.yielded {
            Poll::Ready(Ok(()))
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Suspends the current task until `deadline`.
///
/// Reaching the deadline is this primitive's success case; it never returns
/// [`TaskError::DeadlineExceeded`](crate::TaskError::DeadlineExceeded).
pub async fn sleep_until(deadline: Deadline) -> Result<(), TaskError> {
    Sleep {
        deadline,
        cancel: None,
        timer: None,
    }
    .await
}

/// Suspends the current task for `duration`.
pub async fn sleep(duration: Duration) -> Result<(), TaskError> {
    sleep_until(Deadline::after(duration)).await
}

struct Sleep {
    deadline: Deadline,
    cancel: Option<BoxFuture<'static, ()>>,
    timer: Option<TimerRegistration>,
}

impl Future for Sleep {
    type Output = Result<(), TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
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
            return Poll::Ready(Ok(()));
        }
        let Some(when) = this.deadline.instant() else {
            // Unreachable deadline: only cancellation can finish the sleep.
            return Poll::Pending;
        };
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
        Poll::Pending
    }
}
