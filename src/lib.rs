//! # corevisor
//!
//! **Corevisor** is the runtime core for building high-throughput network
//! services: a cooperative coroutine runtime plus a dependency-aware
//! component lifecycle manager.
//!
//! User code runs as lightweight tasks multiplexed onto fixed worker pools
//! ("task processors"); long-lived service units ("components") are
//! created, wired and torn down through a context that resolves their
//! dependencies at runtime.
//!
//! ## Features
//!
//! | Area                | Description                                                        | Key types / traits                         |
//! |---------------------|--------------------------------------------------------------------|--------------------------------------------|
//! | **Task processors** | Named worker pools with FIFO run-queues and overload control.      | [`TaskProcessor`], [`TaskProcessorConfig`] |
//! | **Tasks**           | Spawn, join, cancel, detach; deadline-aware suspension primitives. | [`Task`], [`Deadline`], [`current_task`]   |
//! | **Pools**           | Shared coroutine frame pool and I/O event-thread pool.             | [`TaskProcessorPools`], [`CoroPool`]       |
//! | **Components**      | Factories, runtime dependency resolution, reverse-order teardown.  | [`Component`], [`ComponentContext`]        |
//! | **Manager**         | Declarative boot and exception-safe shutdown.                      | [`Manager`], [`ManagerConfig`]             |
//! | **Observability**   | Lifecycle events on a broadcast bus.                               | [`Event`], [`Bus`], [`Observer`]           |
//! | **Errors**          | Typed errors for tasks and component loading.                      | [`TaskError`], [`ComponentError`]          |
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use corevisor::{
//!     Component, ComponentConfig, ComponentError, ComponentList, ComponentRef, Manager,
//!     ManagerConfig,
//! };
//!
//! struct Registry;
//!
//! #[async_trait]
//! impl Component for Registry {
//!     fn name(&self) -> &str {
//!         "registry"
//!     }
//! }
//!
//! struct Server {
//!     registry: Arc<Registry>,
//! }
//!
//! #[async_trait]
//! impl Component for Server {
//!     fn name(&self) -> &str {
//!         "server"
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ManagerConfig::default();
//!     config.components.push(ComponentConfig::new("registry"));
//!     config.components.push(ComponentConfig::new("server"));
//!
//!     let components = ComponentList::new()
//!         .append("registry", |_cfg, _ctx| async move {
//!             Ok(Arc::new(Registry) as ComponentRef)
//!         })
//!         .append("server", |_cfg, ctx| async move {
//!             // Suspends until "registry" is active; the dependency edge
//!             // drives teardown order.
//!             let registry = ctx.find_component_as::<Registry>("registry").await?;
//!             Ok(Arc::new(Server { registry }) as ComponentRef)
//!         });
//!
//!     let manager = Manager::start(config, components)?;
//!     // ... run the service ...
//!     manager.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ---

mod components;
mod config;
mod error;
mod events;
mod manager;
mod observer;
mod pools;
mod processor;
mod sync;
mod task;

// ---- Public re-exports ----

pub use components::{AsAnyArc, Component, ComponentContext, ComponentList, ComponentRef, ComponentState};
pub use config::{
    ComponentConfig, CoroPoolConfig, EventPoolConfig, ManagerConfig, TaskProcessorConfig,
};
pub use error::{ComponentError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use manager::Manager;
pub use observer::{LogObserver, Observer};
pub use pools::{CoroPool, CoroPoolStats, EventThreadPool, TaskProcessorPools};
pub use processor::{TaskProcessor, TaskProcessorStats};
pub use task::{sleep, sleep_until, yield_now, Deadline, Task, TaskStatus};

/// Introspection of the task executing on the current worker thread.
pub use task::current_task;
