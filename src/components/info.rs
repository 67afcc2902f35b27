//! Per-component bookkeeping inside the context.

use std::collections::HashSet;

use tokio::sync::watch;

use crate::components::ComponentRef;
use crate::error::ComponentError;

/// Lifecycle state of a registered component.
///
/// Transitions are monotonic in this order; failures may jump to `Stopped`
/// from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentState {
    /// Name is not part of the expected set.
    NotRegistered,
    /// Expected, construction not started.
    Registered,
    /// Construction task is running the factory.
    Created,
    /// Factory returned; instance is usable.
    Active,
    /// Teardown in progress.
    Stopping,
    /// Torn down (or failed before becoming active).
    Stopped,
}

/// State of one registered component.
pub(crate) struct ComponentInfo {
    state_tx: watch::Sender<ComponentState>,
    pub(crate) instance: Option<ComponentRef>,
    pub(crate) error: Option<ComponentError>,
    /// Names this component waits on, as observed during construction.
    pub(crate) depends_on: HashSet<String>,
    /// Names waiting on this component.
    pub(crate) dependents: HashSet<String>,
    /// Construction tasks currently suspended on this component.
    pub(crate) waiters: usize,
    pub(crate) disabled: bool,
}

impl ComponentInfo {
    pub(crate) fn new(disabled: bool) -> Self {
        let (state_tx, _) = watch::channel(ComponentState::Registered);
        Self {
            state_tx,
            instance: None,
            error: None,
            depends_on: HashSet::new(),
            dependents: HashSet::new(),
            waiters: 0,
            disabled,
        }
    }

    pub(crate) fn state(&self) -> ComponentState {
        *self.state_tx.borrow()
    }

    /// Moves the state forward; transitions never regress.
    ///
    /// Waiters only care about `Active` and `Stopped`, so intermediate
    /// transitions update the value without waking anybody.
    pub(crate) fn advance(&self, state: ComponentState) {
        if state <= self.state() {
            return;
        }
        if matches!(state, ComponentState::Active | ComponentState::Stopped) {
            self.state_tx.send_replace(state);
        } else {
            self.state_tx.send_if_modified(|current| {
                *current = state;
                false
            });
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ComponentState> {
        self.state_tx.subscribe()
    }
}
