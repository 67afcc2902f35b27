//! # Registration of components and their factories.
//!
//! A [`ComponentList`] pairs each component name with an async factory. The
//! manager schedules one construction task per registered entry; the factory
//! receives its [`ComponentConfig`](crate::ComponentConfig) subtree and a
//! caller-scoped [`ComponentContext`](crate::ComponentContext) to resolve
//! dependencies through.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use corevisor::{Component, ComponentList, ComponentRef};
//!
//! struct Clock;
//!
//! #[async_trait]
//! impl Component for Clock {
//!     fn name(&self) -> &str {
//!         "clock"
//!     }
//! }
//!
//! let list = ComponentList::new().append("clock", |_cfg, _ctx| async move {
//!     Ok(Arc::new(Clock) as ComponentRef)
//! });
//! assert!(list.contains("clock"));
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::components::{ComponentContext, ComponentRef};
use crate::config::ComponentConfig;
use crate::error::ComponentError;

pub(crate) type BoxedFactory = Arc<
    dyn Fn(ComponentConfig, ComponentContext) -> BoxFuture<'static, Result<ComponentRef, ComponentError>>
        + Send
        + Sync,
>;

pub(crate) struct ComponentAdder {
    pub(crate) name: String,
    pub(crate) factory: BoxedFactory,
}

/// Ordered registration of component factories.
#[derive(Default)]
pub struct ComponentList {
    entries: Vec<ComponentAdder>,
}

impl ComponentList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component factory under `name`.
    ///
    /// Duplicate names are rejected at boot, before any construction task is
    /// scheduled.
    pub fn append<F, Fut>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ComponentConfig, ComponentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ComponentRef, ComponentError>> + Send + 'static,
    {
        let factory: BoxedFactory = Arc::new(move |cfg, ctx| factory(cfg, ctx).boxed());
        self.entries.push(ComponentAdder {
            name: name.into(),
            factory,
        });
        self
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub(crate) fn entries(&self) -> &[ComponentAdder] {
        &self.entries
    }

    pub(crate) fn into_entries(self) -> Vec<ComponentAdder> {
        self.entries
    }
}
