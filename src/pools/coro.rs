//! # Coroutine frame pool.
//!
//! Every task holds one frame for its whole run; the frame returns to a
//! bounded free-list at completion, so `stats().active_coroutines` counts
//! the coroutines that are alive right now. The manager polls that counter
//! down to zero before it tears the pools down.
//!
//! Frames are recycled tokens rather than raw stack arenas: with stackless
//! coroutines the synchronous segments of a task run directly on the worker
//! thread's stack, which is itself sized from
//! [`CoroPoolConfig::stack_size`](crate::CoroPoolConfig).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::CoroPoolConfig;
use crate::sync::lock;

/// Counters exposed by [`CoroPool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoroPoolStats {
    /// Coroutines alive right now (frame acquired, not yet completed).
    pub active_coroutines: usize,
    /// Frames ever created, including recycled ones.
    pub total_coroutines: u64,
    /// Frames currently parked on the free-list.
    pub free_frames: usize,
}

/// A recyclable coroutine frame.
#[derive(Debug)]
struct CoroFrame {
    #[allow(dead_code)]
    id: u64,
}

/// Allocator recycling coroutine frames through a bounded free-list.
pub struct CoroPool {
    config: CoroPoolConfig,
    free: Mutex<Vec<CoroFrame>>,
    active: AtomicUsize,
    total: AtomicU64,
}

impl CoroPool {
    /// Creates the pool and pre-charges `initial_size` frames.
    pub fn new(config: CoroPoolConfig) -> Arc<Self> {
        let initial = config.initial_size.min(config.max_size);
        let free = (0..initial as u64).map(|id| CoroFrame { id }).collect();
        Arc::new(Self {
            total: AtomicU64::new(initial as u64),
            free: Mutex::new(free),
            active: AtomicUsize::new(0),
            config,
        })
    }

    /// Stack bytes backing each frame; used as the worker-thread stack size.
    pub fn stack_size(&self) -> usize {
        self.config.stack_size
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> CoroPoolStats {
        CoroPoolStats {
            active_coroutines: self.active.load(Ordering::Acquire),
            total_coroutines: self.total.load(Ordering::Relaxed),
            free_frames: lock(&self.free).len(),
        }
    }

    /// Takes a frame off the free-list, minting a new one when empty.
    pub(crate) fn acquire(self: &Arc<Self>) -> CoroFrameGuard {
        let frame = lock(&self.free).pop().unwrap_or_else(|| CoroFrame {
            id: self.total.fetch_add(1, Ordering::Relaxed),
        });
        self.active.fetch_add(1, Ordering::AcqRel);
        CoroFrameGuard {
            pool: Arc::clone(self),
            frame: Some(frame),
        }
    }

    fn release(&self, frame: CoroFrame) {
        {
            let mut free = lock(&self.free);
            if free.len() < self.config.max_size {
                free.push(frame);
            }
        }
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Holds one frame for the lifetime of a coroutine.
pub(crate) struct CoroFrameGuard {
    pool: Arc<CoroPool>,
    frame: Option<CoroFrame>,
}

impl Drop for CoroFrameGuard {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.release(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> Arc<CoroPool> {
        CoroPool::new(CoroPoolConfig {
            initial_size: 2,
            max_size: 3,
            stack_size: 64 * 1024,
        })
    }

    #[test]
    fn acquire_release_tracks_active() {
        let pool = small_pool();
        assert_eq!(pool.stats().active_coroutines, 0);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.stats().active_coroutines, 2);
        drop(a);
        drop(b);
        assert_eq!(pool.stats().active_coroutines, 0);
    }

    #[test]
    fn free_list_is_bounded_by_max_size() {
        let pool = small_pool();
        let guards: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.stats().active_coroutines, 5);
        drop(guards);
        let stats = pool.stats();
        assert_eq!(stats.active_coroutines, 0);
        assert_eq!(stats.free_frames, 3);
    }

    #[test]
    fn recycling_does_not_mint_new_frames() {
        let pool = small_pool();
        let before = pool.stats().total_coroutines;
        for _ in 0..10 {
            drop(pool.acquire());
        }
        assert_eq!(pool.stats().total_coroutines, before);
    }
}
