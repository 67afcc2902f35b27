//! # The component capability set.
//!
//! Components are variant instances behind one dynamic interface: a stable
//! name, two optional lifecycle hooks and a destructor (`Drop`). The core
//! dispatches dynamically only on destruction and on the hooks; everything
//! else a component exposes is reached through
//! [`ComponentContext::find_component_as`](crate::ComponentContext::find_component_as).

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ComponentError;

/// Shared handle to a component instance.
pub type ComponentRef = Arc<dyn Component>;

/// Upcast support so component handles can be downcast to concrete types.
///
/// Implemented automatically for every eligible type.
pub trait AsAnyArc {
    /// Converts the handle into an `Any` handle for downcasting.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// # A long-lived service unit with lifecycle hooks.
///
/// Constructed by its factory during boot; destroyed by the context in
/// reverse dependency order during shutdown. Hooks run as tasks on the
/// default task processor and may suspend.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use corevisor::{Component, ComponentError};
///
/// struct Metrics;
///
/// #[async_trait]
/// impl Component for Metrics {
///     fn name(&self) -> &str {
///         "metrics"
///     }
///
///     async fn on_all_components_loaded(&self) -> Result<(), ComponentError> {
///         // start background flushing once the whole graph is up
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Component: AsAnyArc + Send + Sync + 'static {
    /// Stable component name; matches its registration.
    fn name(&self) -> &str;

    /// Called after every component became active, in creation order.
    ///
    /// An error here aborts boot and triggers full teardown.
    async fn on_all_components_loaded(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Called when the service is asked to reopen its log files.
    async fn on_log_rotate(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}
