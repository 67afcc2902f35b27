//! # Components: long-lived service units owned by the context.
//!
//! A component is constructed once during boot by its registered factory,
//! lives behind `Arc<dyn Component>` for the whole run, and is destroyed in
//! reverse dependency order at shutdown. Factories discover dependencies at
//! runtime by calling
//! [`ComponentContext::find_component`]; the context records the edges,
//! detects cycles online and tears down along the observed graph.

mod component;
mod context;
mod info;
mod list;

pub use component::{AsAnyArc, Component, ComponentRef};
pub use context::ComponentContext;
pub use info::ComponentState;
pub use list::ComponentList;
