//! # Error types used by the runtime core and the component subsystem.
//!
//! This module defines two main error enums:
//!
//! - [`TaskError`] errors raised by tasks and task processors.
//! - [`ComponentError`] errors raised by the component context and the manager.
//!
//! Both types provide an `as_label` helper returning a short stable
//! snake_case string for logs/metrics.

use thiserror::Error;

/// # Errors produced by tasks and task processors.
///
/// Task results re-raise at [`Task::get`](crate::Task::get); detached task
/// failures are published to the event bus and dropped.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task processor run-queue is above its high-water mark.
    ///
    /// Only non-critical submissions are rejected; the caller decides
    /// whether to retry or drop.
    #[error("task processor run-queue is saturated")]
    Overloaded,

    /// Operation on a consumed, detached or otherwise invalid task handle.
    #[error("operation on an invalid task handle")]
    WrongState,

    /// The task observed its cancellation flag at a suspension point.
    ///
    /// Cancellation is cooperative and sticky: once requested, every
    /// subsequent suspension point observes it.
    #[error("task cancelled")]
    Cancelled,

    /// A suspension primitive reached its deadline.
    ///
    /// The task keeps running; hitting a deadline never cancels it.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The task future resolved to an error.
    #[error("task failed: {reason}")]
    Failed {
        /// Human-readable failure cause.
        reason: String,
    },

    /// The task body panicked; the panic payload is captured as text.
    #[error("task panicked: {message}")]
    Panicked {
        /// Panic payload rendered to a string.
        message: String,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Overloaded => "task_overloaded",
            TaskError::WrongState => "task_wrong_state",
            TaskError::Cancelled => "task_cancelled",
            TaskError::DeadlineExceeded => "task_deadline_exceeded",
            TaskError::Failed { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
        }
    }

    /// True for results that signal intentional termination rather than failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "opaque panic payload".to_owned()
        };
        TaskError::Panicked { message }
    }
}

/// # Errors produced by the component context and the manager.
///
/// Construction errors are captured per component and collected by the
/// manager; the first non-cancellation error determines the boot result and
/// cancels the rest. Shutdown errors are logged and swallowed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ComponentError {
    /// Two entries of the component list share a name.
    ///
    /// Raised before any construction task is scheduled.
    #[error("duplicate component name in component list: '{name}'")]
    DuplicateComponent {
        /// The duplicate component name.
        name: String,
    },

    /// The configuration and the component list disagree about a name.
    #[error("component '{name}': {detail}")]
    MissingComponent {
        /// The offending component name.
        name: String,
        /// Which side of the mismatch was hit.
        detail: String,
    },

    /// `find_component` on a name outside the expected set.
    #[error("component '{name}' is not registered")]
    Unregistered {
        /// The requested component name.
        name: String,
    },

    /// `find_component` on a component with `load-enabled: false`.
    #[error("component '{name}' is disabled in config")]
    Disabled {
        /// The disabled component name.
        name: String,
    },

    /// Resolving this dependency would close a cycle.
    ///
    /// The path starts and ends with the same component, e.g. `[A, B, A]`.
    #[error("dependency cycle detected: [{}]", path.join(", "))]
    DependencyCycle {
        /// The full cycle, first element repeated at the end.
        path: Vec<String>,
    },

    /// The component load was cancelled while this factory was suspended.
    #[error("components load cancelled")]
    LoadCancelled,

    /// No construction task can make progress; every unfinished factory is
    /// suspended inside `find_component`.
    #[error("components load stalled; unresolved: [{}]", unresolved.join(", "))]
    LoadStalled {
        /// Names of components that never became active.
        unresolved: Vec<String>,
    },

    /// A component factory failed; carries the original cause.
    #[error("component '{name}' construction failed")]
    ConstructionFailed {
        /// The failing component.
        name: String,
        /// The factory's error.
        #[source]
        source: Box<ComponentError>,
    },

    /// A component-defined failure (factories and lifecycle hooks).
    #[error("{reason}")]
    Component {
        /// Human-readable cause supplied by the component.
        reason: String,
    },

    /// A task-level error crossed into component construction.
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ComponentError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ComponentError::DuplicateComponent { .. } => "component_duplicate",
            ComponentError::MissingComponent { .. } => "component_missing",
            ComponentError::Unregistered { .. } => "component_unregistered",
            ComponentError::Disabled { .. } => "component_disabled",
            ComponentError::DependencyCycle { .. } => "component_dependency_cycle",
            ComponentError::LoadCancelled => "components_load_cancelled",
            ComponentError::LoadStalled { .. } => "components_load_stalled",
            ComponentError::ConstructionFailed { .. } => "component_construction_failed",
            ComponentError::Component { .. } => "component_error",
            ComponentError::Task(e) => e.as_label(),
        }
    }

    /// True when the error signals intentional cancellation of the load,
    /// as opposed to a genuine construction failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ComponentError::LoadCancelled | ComponentError::Task(TaskError::Cancelled)
        )
    }

    /// Wraps a component-defined failure cause.
    pub fn component(reason: impl Into<String>) -> Self {
        ComponentError::Component {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(TaskError::Overloaded.as_label(), "task_overloaded");
        assert_eq!(
            ComponentError::LoadStalled { unresolved: vec![] }.as_label(),
            "components_load_stalled"
        );
        assert_eq!(
            ComponentError::Task(TaskError::Cancelled).as_label(),
            "task_cancelled"
        );
    }

    #[test]
    fn cancellation_classification() {
        assert!(ComponentError::LoadCancelled.is_cancellation());
        assert!(ComponentError::Task(TaskError::Cancelled).is_cancellation());
        assert!(!ComponentError::component("boom").is_cancellation());
        assert!(!ComponentError::Task(TaskError::DeadlineExceeded).is_cancellation());
    }

    #[test]
    fn cycle_message_names_full_path() {
        let err = ComponentError::DependencyCycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: [a, b, a]");
    }
}
