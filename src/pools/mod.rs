//! # Process-shared pools backing all task processors of one manager.
//!
//! [`TaskProcessorPools`] bundles the coroutine frame pool and the I/O
//! event-thread pool. Every processor of a manager shares one instance; the
//! manager holds the last strong reference and releases it only after every
//! processor has stopped.

mod coro;
mod event;

use std::sync::Arc;

pub use coro::{CoroPool, CoroPoolStats};
pub use event::EventThreadPool;
pub(crate) use event::TimerRegistration;

use crate::config::{CoroPoolConfig, EventPoolConfig};

/// Shared coroutine and event pools.
pub struct TaskProcessorPools {
    coro: Arc<CoroPool>,
    event: Arc<EventThreadPool>,
}

impl TaskProcessorPools {
    /// Builds both pools; the event pool spawns its reactor threads here.
    pub fn new(coro: CoroPoolConfig, event: EventPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            coro: CoroPool::new(coro),
            event: EventThreadPool::start(event),
        })
    }

    /// The coroutine frame pool.
    pub fn coro_pool(&self) -> &Arc<CoroPool> {
        &self.coro
    }

    /// The event-thread pool.
    pub fn event_pool(&self) -> &Arc<EventThreadPool> {
        &self.event
    }
}
