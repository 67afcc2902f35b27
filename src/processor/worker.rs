//! Worker thread loop.
//!
//! Each worker blocks on the run-queue, installs the current-task snapshot
//! and polls the continuation on its own stack. Workers are interchangeable:
//! after a suspension a task may resume on any worker of its processor.

use std::sync::Arc;

use crate::events::{Event, EventKind};
use crate::processor::TaskProcessor;
use crate::task::current_task::{self, CurrentTask};

pub(crate) fn run(processor: Arc<TaskProcessor>) {
    let mut executed: u64 = 0;
    while let Some(ctx) = processor.queue().pop() {
        executed += 1;
        let config = processor.config();
        if config.task_trace_enabled && executed % config.task_trace_every.max(1) == 0 {
            processor.bus().publish(
                Event::now(EventKind::TaskTraced)
                    .with_task(ctx.name().as_ref())
                    .with_processor(processor.name()),
            );
        }

        let _scope = current_task::enter(CurrentTask {
            token: ctx.token().clone(),
            critical: ctx.is_critical(),
            processor: Arc::clone(&processor),
        });
        ctx.poll_once();
    }
}
