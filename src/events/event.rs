//! # Event payloads published on the [`Bus`](crate::Bus).
//!
//! [`EventKind`] classifies events across three categories:
//! - **Manager events**: boot and shutdown milestones.
//! - **Component events**: per-component lifecycle transitions.
//! - **Task/processor events**: task failures, traces, processor state.
//!
//! Each event carries a globally unique sequence number (`seq`) that
//! increases monotonically, so consumers can order events even when they are
//! delivered through buffered channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Manager events ===
    /// The manager started constructing pools and processors.
    ManagerStarting,
    /// Boot finished; all components are active.
    ManagerStarted,
    /// Shutdown began.
    ManagerStopping,
    /// Shutdown finished; all threads joined.
    ManagerStopped,
    /// A log-rotation request is being forwarded to components.
    LogRotate,

    // === Component events ===
    /// A component's construction task began running its factory.
    ComponentStarting,
    /// A component became active.
    ComponentActive,
    /// A component factory or hook failed.
    ComponentFailed,
    /// A disabled component was skipped.
    ComponentSkipped,
    /// A component began tearing down.
    ComponentStopping,
    /// A component finished tearing down.
    ComponentStopped,
    /// Every construction task succeeded.
    AllComponentsCreated,
    /// Post-construction hooks finished; the load duration is recorded.
    AllComponentsLoaded,
    /// The component load was cancelled.
    LoadCancelled,

    // === Task / processor events ===
    /// A task processor spawned its workers.
    ProcessorStarted,
    /// A task processor began draining.
    ProcessorShutdown,
    /// A detached task failed; the error is dropped after this event.
    TaskFailed,
    /// A sampled task execution (task tracing enabled).
    TaskTraced,
    /// `CPU_LIMIT` overrode the default processor's thread count.
    CpuLimitApplied,
    /// `CPU_LIMIT` was present but unusable and is ignored.
    CpuLimitIgnored,
}

/// A single runtime event with optional context fields.
#[derive(Debug, Clone)]
pub struct Event {
    /// Monotonic sequence number.
    pub seq: u64,
    /// Wall-clock timestamp taken at creation.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Component name, when the event concerns one.
    pub component: Option<String>,
    /// Task name, when the event concerns one.
    pub task: Option<String>,
    /// Task processor name, when the event concerns one.
    pub processor: Option<String>,
    /// Rendered error, for failure events.
    pub error: Option<String>,
    /// Free-form detail.
    pub detail: Option<String>,
}

impl Event {
    /// Creates an event stamped with the current time and the next sequence
    /// number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, Ordering::Relaxed),
            at: SystemTime::now(),
            kind,
            component: None,
            task: None,
            processor: None,
            error: None,
            detail: None,
        }
    }

    /// Attaches a component name.
    pub fn with_component(mut self, name: impl Into<String>) -> Self {
        self.component = Some(name.into());
        self
    }

    /// Attaches a task name.
    pub fn with_task(mut self, name: impl Into<String>) -> Self {
        self.task = Some(name.into());
        self
    }

    /// Attaches a task processor name.
    pub fn with_processor(mut self, name: impl Into<String>) -> Self {
        self.processor = Some(name.into());
        self
    }

    /// Attaches a rendered error.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches free-form detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::now(EventKind::ManagerStarting);
        let b = Event::now(EventKind::ManagerStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_fill_fields() {
        let ev = Event::now(EventKind::ComponentFailed)
            .with_component("db")
            .with_error("boom")
            .with_detail("during factory");
        assert_eq!(ev.component.as_deref(), Some("db"));
        assert_eq!(ev.error.as_deref(), Some("boom"));
        assert_eq!(ev.detail.as_deref(), Some("during factory"));
        assert!(ev.task.is_none());
    }
}
