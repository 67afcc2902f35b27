//! # Runtime and component configuration.
//!
//! [`ManagerConfig`] is the declarative root consumed by
//! [`Manager::start`](crate::Manager::start): shared pool sizing, the task
//! processor list, the default processor name and the component list.
//!
//! Parsing configuration files is out of scope for the core; every struct
//! here derives [`serde::Deserialize`] so an external loader can produce it,
//! and the per-component subtree stays opaque (`serde_json::Value`) until the
//! component factory interprets it.
//!
//! # Example
//! ```
//! use corevisor::{ManagerConfig, TaskProcessorConfig};
//!
//! let mut cfg = ManagerConfig::default();
//! cfg.task_processors.push(TaskProcessorConfig {
//!     name: "fs-task-processor".into(),
//!     worker_threads: 2,
//!     ..TaskProcessorConfig::default()
//! });
//!
//! assert_eq!(cfg.default_task_processor, "main-task-processor");
//! ```

use serde::de::DeserializeOwned;
use serde::Deserialize;

fn default_true() -> bool {
    true
}

/// Sizing of the shared coroutine pool.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoroPoolConfig {
    /// Frames allocated up front.
    pub initial_size: usize,
    /// Upper bound on frames retained by the free-list.
    pub max_size: usize,
    /// Stack bytes backing each coroutine frame; worker threads are spawned
    /// with this stack size.
    pub stack_size: usize,
}

impl Default for CoroPoolConfig {
    /// Provides a default configuration:
    /// - `initial_size = 64`
    /// - `max_size = 1024`
    /// - `stack_size = 256 KiB`
    fn default() -> Self {
        Self {
            initial_size: 64,
            max_size: 1024,
            stack_size: 256 * 1024,
        }
    }
}

/// Sizing of the I/O event-thread pool.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EventPoolConfig {
    /// Number of reactor threads.
    pub threads: usize,
    /// Base name for reactor threads (`{thread_name}-{i}`).
    pub thread_name: String,
}

impl Default for EventPoolConfig {
    /// Provides a default configuration:
    /// - `threads = 2`
    /// - `thread_name = "event-worker"`
    fn default() -> Self {
        Self {
            threads: 2,
            thread_name: "event-worker".into(),
        }
    }
}

/// Immutable per-processor configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TaskProcessorConfig {
    /// Unique processor name; components address processors by it.
    pub name: String,
    /// Number of OS worker threads.
    pub worker_threads: usize,
    /// Base name for worker threads (`{thread_name}-{i}`).
    pub thread_name: String,
    /// Publish a trace event for sampled task executions.
    pub task_trace_enabled: bool,
    /// Sample every Nth execution when tracing is enabled.
    pub task_trace_every: u64,
    /// Let `CPU_LIMIT` override `worker_threads` (default processor only).
    pub should_guess_cpu_limit: bool,
    /// Run-queue length above which non-critical submissions are rejected.
    pub queue_high_water: usize,
}

impl Default for TaskProcessorConfig {
    /// Provides a default configuration:
    /// - `name = "main-task-processor"`
    /// - `worker_threads = 4`
    /// - `thread_name = "task-worker"`
    /// - tracing disabled, sampled every 1000th execution when enabled
    /// - `should_guess_cpu_limit = false`
    /// - `queue_high_water = 8192`
    fn default() -> Self {
        Self {
            name: "main-task-processor".into(),
            worker_threads: 4,
            thread_name: "task-worker".into(),
            task_trace_enabled: false,
            task_trace_every: 1000,
            should_guess_cpu_limit: false,
            queue_high_water: 8192,
        }
    }
}

/// Per-component configuration entry.
///
/// `config` is an opaque subtree the core never interprets; the component
/// factory deserializes it into whatever shape it wants.
#[derive(Clone, Debug, Deserialize)]
pub struct ComponentConfig {
    /// Component name; must match a registered component.
    pub name: String,
    /// Skip construction when false; dependents fail with
    /// [`ComponentError::Disabled`](crate::ComponentError::Disabled).
    #[serde(rename = "load-enabled", default = "default_true")]
    pub load_enabled: bool,
    /// Opaque configuration subtree consumed by the component factory.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ComponentConfig {
    /// Creates an enabled entry with an empty subtree.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load_enabled: true,
            config: serde_json::Value::Null,
        }
    }

    /// Marks the entry as load-disabled.
    pub fn disabled(mut self) -> Self {
        self.load_enabled = false;
        self
    }

    /// Replaces the opaque subtree.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Deserializes the opaque subtree into a component-defined shape.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.config)
    }
}

/// Declarative root configuration for [`Manager`](crate::Manager).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Shared coroutine pool sizing.
    pub coro_pool: CoroPoolConfig,
    /// Shared event-thread pool sizing.
    pub event_thread_pool: EventPoolConfig,
    /// Task processors to construct, in order.
    pub task_processors: Vec<TaskProcessorConfig>,
    /// Name of the processor that hosts boot, teardown and component hooks.
    pub default_task_processor: String,
    /// Component configuration entries.
    pub components: Vec<ComponentConfig>,
    /// Capacity of the event bus channel.
    pub event_bus_capacity: usize,
}

impl Default for ManagerConfig {
    /// Provides a single default processor ("main-task-processor"), default
    /// pool sizing, an empty component list and `event_bus_capacity = 1024`.
    fn default() -> Self {
        Self {
            coro_pool: CoroPoolConfig::default(),
            event_thread_pool: EventPoolConfig::default(),
            task_processors: vec![TaskProcessorConfig::default()],
            default_task_processor: "main-task-processor".into(),
            components: Vec::new(),
            event_bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_config_defaults_to_enabled() {
        let parsed: ComponentConfig =
            serde_json::from_str(r#"{ "name": "logger" }"#).expect("parse");
        assert!(parsed.load_enabled);
        assert!(parsed.config.is_null());
    }

    #[test]
    fn load_enabled_uses_config_spelling() {
        let parsed: ComponentConfig =
            serde_json::from_str(r#"{ "name": "logger", "load-enabled": false }"#).expect("parse");
        assert!(!parsed.load_enabled);
    }

    #[test]
    fn opaque_subtree_round_trips_through_parse() {
        #[derive(Deserialize)]
        struct Subtree {
            port: u16,
        }
        let entry = ComponentConfig::new("server")
            .with_config(serde_json::json!({ "port": 8080 }));
        let subtree: Subtree = entry.parse().expect("parse subtree");
        assert_eq!(subtree.port, 8080);
    }
}
