//! # Task processors: named worker pools executing coroutine tasks.
//!
//! A [`TaskProcessor`] owns a FIFO run-queue and `worker_threads` OS
//! threads. Tasks are admitted through [`TaskProcessor::spawn`] (subject to
//! the queue's high-water mark) or [`TaskProcessor::spawn_critical`]
//! (bypasses the overload check; used for boot, teardown and shutdown
//! hooks). Tasks never migrate between processors; moving work elsewhere is
//! an explicit spawn on the other processor.
//!
//! After [`TaskProcessor::initiate_shutdown`] no new submissions are
//! admitted: a spawn on a draining processor yields a handle that is already
//! cancelled. In-flight tasks keep running; the queue closes once the last
//! of them completes, and the workers drain and exit.

mod queue;
mod worker;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::config::TaskProcessorConfig;
use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::pools::TaskProcessorPools;
use crate::sync::lock;
use crate::task::context::TaskContext;
use crate::task::{Task, TaskShared};

use queue::RunQueue;

/// Counters exposed by [`TaskProcessor::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProcessorStats {
    /// Ready tasks currently enqueued.
    pub queue_len: usize,
    /// Tasks admitted and not yet completed.
    pub alive_tasks: usize,
    /// Tasks ever admitted.
    pub total_created: u64,
    /// Tasks that finished cancelled.
    pub total_cancelled: u64,
    /// Non-critical submissions rejected at the high-water mark.
    pub total_overloaded: u64,
}

/// A named pool of OS threads cooperatively executing tasks from a FIFO
/// queue.
pub struct TaskProcessor {
    config: TaskProcessorConfig,
    pools: Arc<TaskProcessorPools>,
    bus: Bus,
    queue: RunQueue,
    alive: AtomicUsize,
    shutdown: AtomicBool,
    created: AtomicU64,
    cancelled: AtomicU64,
    overloaded: AtomicU64,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl TaskProcessor {
    /// Builds the processor and spawns its worker threads.
    ///
    /// Worker stacks are sized from the coroutine pool's `stack_size`; with
    /// stackless coroutines the synchronous segments of every task run on
    /// these stacks.
    pub fn start(
        config: TaskProcessorConfig,
        pools: Arc<TaskProcessorPools>,
        bus: Bus,
    ) -> Arc<Self> {
        let processor = Arc::new(Self {
            queue: RunQueue::new(),
            pools,
            bus,
            alive: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            created: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            overloaded: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
            config,
        });
        {
            let mut workers = lock(&processor.workers);
            for i in 0..processor.config.worker_threads.max(1) {
                let worker_processor = Arc::clone(&processor);
                let handle = thread::Builder::new()
                    .name(format!("{}-{}", processor.config.thread_name, i))
                    .stack_size(processor.pools.coro_pool().stack_size())
                    .spawn(move || worker::run(worker_processor))
                    .expect("failed to spawn task processor worker thread");
                workers.push(handle);
            }
        }
        processor.bus.publish(
            Event::now(EventKind::ProcessorStarted).with_processor(processor.config.name.clone()),
        );
        processor
    }

    /// Processor name; components address processors by it.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Number of configured worker threads.
    pub fn worker_threads(&self) -> usize {
        self.config.worker_threads.max(1)
    }

    pub(crate) fn config(&self) -> &TaskProcessorConfig {
        &self.config
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The pools shared with the other processors of this manager.
    pub fn pools(&self) -> &Arc<TaskProcessorPools> {
        &self.pools
    }

    /// Admits a task; fails with [`TaskError::Overloaded`] above the
    /// high-water mark. The caller decides retry versus drop.
    pub fn spawn<T, F>(
        self: &Arc<Self>,
        name: impl Into<String>,
        future: F,
    ) -> Result<Task<T>, TaskError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        if !self.queue.is_closed() && self.queue.len() >= self.config.queue_high_water {
            self.overloaded.fetch_add(1, Ordering::Relaxed);
            return Err(TaskError::Overloaded);
        }
        Ok(self.submit(name.into(), future, false))
    }

    /// Admits a critical task: bypasses the overload check, otherwise FIFO
    /// like any other task.
    pub fn spawn_critical<T, F>(self: &Arc<Self>, name: impl Into<String>, future: F) -> Task<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.submit(name.into(), future, true)
    }

    fn submit<T, F>(self: &Arc<Self>, name: String, future: F, critical: bool) -> Task<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.created.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = name.into();
        let token = CancellationToken::new();
        let shared = Arc::new(TaskShared::new(Arc::clone(&name), self.bus.clone()));

        if self.shutdown.load(Ordering::Acquire) {
            return self.reject_draining(name, token, critical, shared);
        }

        let ctx = Arc::new(TaskContext::new(
            Arc::clone(&name),
            Arc::downgrade(self),
            token.clone(),
            critical,
        ));

        let frame = self.pools.coro_pool().acquire();
        let live = LiveGuard::new(Arc::clone(self));
        let completion = CompletionGuard {
            shared: Arc::clone(&shared),
            processor: Arc::clone(self),
        };
        let continuation = async move {
            let _frame = frame;
            let _live = live;
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(TaskError::from_panic(payload)),
            };
            completion.finish(result);
        };
        ctx.bind(Box::pin(continuation));

        ctx.mark_queued();
        if self.queue.push(Arc::clone(&ctx)) {
            Task::new(shared, ctx)
        } else {
            // Shutdown raced the admission check; dropping the bound
            // continuation releases the frame and completes the slot.
            drop(ctx);
            Task::new(
                shared,
                Arc::new(TaskContext::completed(name, token, critical)),
            )
        }
    }

    fn reject_draining<T: Send + 'static>(
        self: &Arc<Self>,
        name: Arc<str>,
        token: CancellationToken,
        critical: bool,
        shared: Arc<TaskShared<T>>,
    ) -> Task<T> {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        shared.complete(Err(TaskError::Cancelled));
        Task::new(
            shared,
            Arc::new(TaskContext::completed(name, token, critical)),
        )
    }

    /// Marks the processor as draining; idempotent.
    ///
    /// In-flight tasks continue; the queue closes when the last one
    /// completes.
    pub fn initiate_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.publish(
            Event::now(EventKind::ProcessorShutdown).with_processor(self.config.name.clone()),
        );
        if self.alive.load(Ordering::Acquire) == 0 {
            self.queue.close();
        }
    }

    /// Joins the worker threads.
    ///
    /// Call after [`TaskProcessor::initiate_shutdown`] once every task has
    /// completed; joining earlier blocks until they have.
    pub fn join_workers(&self) {
        let handles: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Returns a snapshot of the processor counters.
    pub fn stats(&self) -> TaskProcessorStats {
        TaskProcessorStats {
            queue_len: self.queue.len(),
            alive_tasks: self.alive.load(Ordering::Acquire),
            total_created: self.created.load(Ordering::Relaxed),
            total_cancelled: self.cancelled.load(Ordering::Relaxed),
            total_overloaded: self.overloaded.load(Ordering::Relaxed),
        }
    }

    /// Reinjects a resumed context at the queue tail; never rejected.
    pub(crate) fn schedule_ready(&self, ctx: Arc<TaskContext>) {
        let _ = self.queue.push(ctx);
    }

    pub(crate) fn queue(&self) -> &RunQueue {
        &self.queue
    }

    pub(crate) fn note_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }
}

/// Keeps the live-task counter accurate for the lifetime of a continuation.
struct LiveGuard {
    processor: Arc<TaskProcessor>,
}

impl LiveGuard {
    fn new(processor: Arc<TaskProcessor>) -> Self {
        processor.alive.fetch_add(1, Ordering::AcqRel);
        Self { processor }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let prev = self.processor.alive.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && self.processor.shutdown.load(Ordering::Acquire) {
            self.processor.queue.close();
        }
    }
}

/// Completes the result slot exactly once, even when the continuation is
/// dropped without running (queue closed mid-shutdown).
struct CompletionGuard<T> {
    shared: Arc<TaskShared<T>>,
    processor: Arc<TaskProcessor>,
}

impl<T> CompletionGuard<T> {
    fn finish(self, result: Result<T, TaskError>) {
        if matches!(result, Err(TaskError::Cancelled)) {
            self.processor.note_cancelled();
        }
        self.shared.complete(result);
    }
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if !self.shared.is_complete() {
            self.processor.note_cancelled();
            self.shared.complete(Err(TaskError::Cancelled));
        }
    }
}
