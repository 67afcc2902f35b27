//! # Deadlines for suspension primitives.
//!
//! Timeouts in the core are expressed as absolute deadlines. Every
//! suspension primitive accepts one and fails with
//! [`TaskError::DeadlineExceeded`](crate::TaskError::DeadlineExceeded) when
//! it is reached; the task keeps running.

use std::time::{Duration, Instant};

/// An absolute point in time a suspension primitive must not sleep past.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that is never reached.
    pub fn unreachable() -> Self {
        Self(None)
    }

    /// A deadline at the given instant.
    pub fn at(when: Instant) -> Self {
        Self(Some(when))
    }

    /// A deadline `after` from now; saturates to unreachable on overflow.
    pub fn after(after: Duration) -> Self {
        Self(Instant::now().checked_add(after))
    }

    /// False for [`Deadline::unreachable`].
    pub fn is_reachable(&self) -> bool {
        self.0.is_some()
    }

    /// True once the deadline has passed.
    pub fn is_reached(&self) -> bool {
        self.0.map_or(false, |when| Instant::now() >= when)
    }

    /// The underlying instant, if reachable.
    pub fn instant(&self) -> Option<Instant> {
        self.0
    }
}
