//! # Event-thread pool: deadline reactors that wake suspended tasks.
//!
//! One reactor per thread. Each reactor owns a deadline heap; registrations
//! are spread round-robin across reactors. When a deadline is reached the
//! reactor fires the stored waker, which re-enqueues the task into its
//! owning processor's run-queue. Drivers translate I/O readiness into the
//! same waker-firing path.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::task::Waker;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::EventPoolConfig;
use crate::sync::lock;

/// Upper bound between polls even when no deadline is due.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct TimerEntry {
    deadline: Instant,
    id: u64,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.deadline, self.id).cmp(&(other.deadline, other.id))
    }
}

#[derive(Default)]
struct TimerHeap {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    pending: HashSet<u64>,
    cancelled: HashSet<u64>,
    next_id: u64,
}

struct Reactor {
    timers: Mutex<TimerHeap>,
    available: Condvar,
    shutdown: AtomicBool,
}

impl Reactor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            timers: Mutex::new(TimerHeap::default()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    fn register(self: &Arc<Self>, deadline: Instant, waker: Waker) -> TimerRegistration {
        let id = {
            let mut timers = lock(&self.timers);
            let id = timers.next_id;
            timers.next_id += 1;
            timers.pending.insert(id);
            timers.heap.push(Reverse(TimerEntry {
                deadline,
                id,
                waker,
            }));
            id
        };
        self.available.notify_one();
        TimerRegistration {
            reactor: Arc::clone(self),
            id,
        }
    }

    fn cancel(&self, id: u64) {
        let mut timers = lock(&self.timers);
        if timers.pending.remove(&id) {
            timers.cancelled.insert(id);
        }
    }

    fn run(self: Arc<Self>) {
        let mut timers = lock(&self.timers);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let now = Instant::now();
            let mut due = Vec::new();
            while timers
                .heap
                .peek()
                .map_or(false, |Reverse(e)| e.deadline <= now)
            {
                if let Some(Reverse(entry)) = timers.heap.pop() {
                    timers.pending.remove(&entry.id);
                    if !timers.cancelled.remove(&entry.id) {
                        due.push(entry.waker);
                    }
                }
            }
            if !due.is_empty() {
                drop(timers);
                for waker in due {
                    waker.wake();
                }
                timers = lock(&self.timers);
                continue;
            }
            let timeout = timers
                .heap
                .peek()
                .map(|Reverse(e)| e.deadline.saturating_duration_since(now))
                .unwrap_or(MAX_POLL_INTERVAL)
                .min(MAX_POLL_INTERVAL);
            let (guard, _) = self
                .available
                .wait_timeout(timers, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            timers = guard;
        }
    }
}

/// Cancels its timer entry when dropped.
pub(crate) struct TimerRegistration {
    reactor: Arc<Reactor>,
    id: u64,
}

impl Drop for TimerRegistration {
    fn drop(&mut self) {
        self.reactor.cancel(self.id);
    }
}

/// Pool of reactor threads translating deadlines into task wake-ups.
pub struct EventThreadPool {
    reactors: Vec<Arc<Reactor>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    next: AtomicUsize,
}

impl EventThreadPool {
    /// Spawns `config.threads` reactor threads (at least one).
    pub fn start(config: EventPoolConfig) -> Arc<Self> {
        let count = config.threads.max(1);
        let reactors: Vec<_> = (0..count).map(|_| Reactor::new()).collect();
        let mut threads = Vec::with_capacity(count);
        for (i, reactor) in reactors.iter().enumerate() {
            let reactor = Arc::clone(reactor);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, i))
                .spawn(move || reactor.run())
                .expect("failed to spawn event reactor thread");
            threads.push(handle);
        }
        Arc::new(Self {
            reactors,
            threads: Mutex::new(threads),
            next: AtomicUsize::new(0),
        })
    }

    /// Registers a waker to fire at `deadline`; dropping the returned guard
    /// cancels it.
    pub(crate) fn register_timer(&self, deadline: Instant, waker: Waker) -> TimerRegistration {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.reactors.len();
        self.reactors[slot].register(deadline, waker)
    }
}

impl Drop for EventThreadPool {
    fn drop(&mut self) {
        for reactor in &self.reactors {
            reactor.shutdown.store(true, Ordering::Release);
            reactor.available.notify_all();
        }
        for handle in lock(&self.threads).drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::ArcWake;
    use std::sync::atomic::AtomicUsize;

    struct CountingWake(AtomicUsize);

    impl ArcWake for CountingWake {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_pool() -> Arc<EventThreadPool> {
        EventThreadPool::start(EventPoolConfig {
            threads: 1,
            thread_name: "test-event".into(),
        })
    }

    #[test]
    fn due_timer_fires_waker() {
        let pool = test_pool();
        let hits = Arc::new(CountingWake(AtomicUsize::new(0)));
        let _reg = pool.register_timer(
            Instant::now() + Duration::from_millis(5),
            futures::task::waker(Arc::clone(&hits)),
        );
        let deadline = Instant::now() + Duration::from_secs(2);
        while hits.0.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(hits.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_timer_stays_silent() {
        let pool = test_pool();
        let hits = Arc::new(CountingWake(AtomicUsize::new(0)));
        let reg = pool.register_timer(
            Instant::now() + Duration::from_millis(20),
            futures::task::waker(Arc::clone(&hits)),
        );
        drop(reg);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(hits.0.load(Ordering::SeqCst), 0);
    }
}
