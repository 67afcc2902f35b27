//! # Lifecycle events emitted by the runtime core.
//!
//! The manager, task processors and the component context report what they
//! are doing by publishing [`Event`]s on a [`Bus`]; an
//! [`Observer`](crate::Observer) consumes them. This is the core's whole
//! observability surface: the logging subsystem proper lives outside and
//! subscribes like any other consumer.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
