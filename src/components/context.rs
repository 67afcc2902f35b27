//! # The component context: registry and dependency resolver.
//!
//! Construction tasks run in parallel on the default processor; the first
//! time a factory calls [`ComponentContext::find_component`] an edge
//! `caller → target` is recorded and the caller suspends until the target
//! becomes active. Cycles are detected online against the observed wait
//! graph; when every unfinished factory is suspended the context declares a
//! stall and cancels the load. Teardown destroys components in reverse
//! order of the observed edges.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::components::info::{ComponentInfo, ComponentState};
use crate::components::{Component, ComponentRef};
use crate::config::ComponentConfig;
use crate::error::ComponentError;
use crate::events::{Bus, Event, EventKind};
use crate::processor::TaskProcessor;
use crate::sync::lock;

struct ContextTable {
    infos: HashMap<String, ComponentInfo>,
    /// Names in the order they reached `Created`.
    created_order: Vec<String>,
    /// Construction tasks not yet finished.
    unfinished: usize,
    /// Construction tasks currently suspended in `find_component`.
    waiting: usize,
    /// First component that stored a non-cancellation error.
    first_failure: Option<String>,
}

impl ContextTable {
    fn add_edge(&mut self, caller: &str, target: &str) {
        if let Some(info) = self.infos.get_mut(caller) {
            info.depends_on.insert(target.to_owned());
        }
        if let Some(info) = self.infos.get_mut(target) {
            info.dependents.insert(caller.to_owned());
        }
    }

    fn remove_edge(&mut self, caller: &str, target: &str) {
        if let Some(info) = self.infos.get_mut(caller) {
            info.depends_on.remove(target);
        }
        if let Some(info) = self.infos.get_mut(target) {
            info.dependents.remove(caller);
        }
    }

    /// Advances a component into a terminal wait state and releases its
    /// waiters from the blocked count.
    ///
    /// Must happen under the same lock as the transition: a waiter woken by
    /// `Active` or `Stopped` is runnable, and counting it as blocked until
    /// it is polled again would let the stall checks fire on graphs that
    /// are still making progress.
    fn settle(&mut self, name: &str, state: ComponentState) {
        if let Some(info) = self.infos.get_mut(name) {
            let was_blocking = info.state() < ComponentState::Active;
            info.advance(state);
            if was_blocking && info.state() >= ComponentState::Active {
                self.waiting = self.waiting.saturating_sub(info.waiters);
                info.waiters = 0;
            }
        }
    }

    /// A path `from → … → goal` along unsatisfied wait edges, if one exists.
    fn wait_path(&self, from: &str, goal: &str) -> Option<Vec<String>> {
        let mut path = vec![from.to_owned()];
        let mut visited = HashSet::new();
        if self.wait_dfs(from, goal, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn wait_dfs(
        &self,
        node: &str,
        goal: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        if node == goal {
            return true;
        }
        if !visited.insert(node.to_owned()) {
            return false;
        }
        let Some(info) = self.infos.get(node) else {
            return false;
        };
        // An active component waits on nothing.
        if info.state() >= ComponentState::Active {
            return false;
        }
        for next in &info.depends_on {
            path.push(next.clone());
            if self.wait_dfs(next, goal, visited, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    /// Enabled components that never became active, sorted for stable
    /// reporting.
    fn unresolved(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .infos
            .iter()
            .filter(|(_, info)| !info.disabled && info.state() < ComponentState::Active)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

pub(crate) struct ContextInner {
    table: Mutex<ContextTable>,
    cancel: CancellationToken,
    stalled: AtomicBool,
    load_done: AtomicBool,
    bus: Bus,
    default_processor: Arc<TaskProcessor>,
}

pub(crate) struct BootOutcome {
    pub(crate) first_failure: Option<(String, ComponentError)>,
    pub(crate) unresolved: Vec<String>,
}

/// Registry and dependency resolver hosting all components.
///
/// Cloning is cheap; a clone handed to a factory is scoped to that
/// component, so the edges it records are attributed to the right caller.
#[derive(Clone)]
pub struct ComponentContext {
    inner: Arc<ContextInner>,
    scope: Option<Arc<str>>,
}

impl ComponentContext {
    pub(crate) fn new(
        expected: impl IntoIterator<Item = String>,
        disabled: HashSet<String>,
        bus: Bus,
        default_processor: Arc<TaskProcessor>,
    ) -> Self {
        let infos = expected
            .into_iter()
            .map(|name| {
                let is_disabled = disabled.contains(&name);
                (name, ComponentInfo::new(is_disabled))
            })
            .collect();
        Self {
            inner: Arc::new(ContextInner {
                table: Mutex::new(ContextTable {
                    infos,
                    created_order: Vec::new(),
                    unfinished: 0,
                    waiting: 0,
                    first_failure: None,
                }),
                cancel: CancellationToken::new(),
                stalled: AtomicBool::new(false),
                load_done: AtomicBool::new(false),
                bus,
                default_processor,
            }),
            scope: None,
        }
    }

    pub(crate) fn scoped(&self, caller: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            scope: Some(Arc::from(caller)),
        }
    }

    /// Resolves a component by name, suspending until it becomes active.
    ///
    /// Called from inside a factory this records a dependency edge from the
    /// calling component. Fails with [`ComponentError::Unregistered`] for
    /// unknown names, [`ComponentError::Disabled`] for load-disabled ones,
    /// [`ComponentError::DependencyCycle`] when the wait would close a cycle
    /// and [`ComponentError::LoadCancelled`] once the load is cancelled.
    pub async fn find_component(&self, name: &str) -> Result<ComponentRef, ComponentError> {
        let mut rx = {
            let mut table = lock(&self.inner.table);
            let Some(info) = table.infos.get(name) else {
                return Err(ComponentError::Unregistered {
                    name: name.to_owned(),
                });
            };
            if info.disabled {
                return Err(ComponentError::Disabled {
                    name: name.to_owned(),
                });
            }
            let state = info.state();
            if state >= ComponentState::Active {
                return match &info.instance {
                    Some(instance) => Ok(Arc::clone(instance)),
                    // Failed construction or teardown already took it.
                    None => Err(ComponentError::LoadCancelled),
                };
            }
            if !self.inner.load_done.load(Ordering::Acquire) && self.inner.cancel.is_cancelled() {
                return Err(ComponentError::LoadCancelled);
            }
            if let Some(caller) = &self.scope {
                table.add_edge(caller.as_ref(), name);
                if let Some(path) = table.wait_path(name, caller.as_ref()) {
                    // The wait never happens, so the edge must not survive
                    // into the teardown graph.
                    table.remove_edge(caller.as_ref(), name);
                    let mut full = Vec::with_capacity(path.len() + 1);
                    full.push(caller.to_string());
                    full.extend(path);
                    return Err(ComponentError::DependencyCycle { path: full });
                }
            }
            table.waiting += 1;
            if table.unfinished > 0 && table.waiting == table.unfinished {
                // Every unfinished construction task is now suspended here:
                // nothing can wake anybody.
                table.waiting -= 1;
                let unresolved = table.unresolved();
                drop(table);
                self.inner.stalled.store(true, Ordering::Release);
                self.cancel_components_load();
                return Err(ComponentError::LoadStalled { unresolved });
            }
            match table.infos.get_mut(name) {
                Some(info) => {
                    info.waiters += 1;
                    info.subscribe()
                }
                None => {
                    table.waiting = table.waiting.saturating_sub(1);
                    return Err(ComponentError::Unregistered {
                        name: name.to_owned(),
                    });
                }
            }
        };

        let _waiting = WaitingGuard {
            inner: &self.inner,
            target: name,
        };
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    return Err(ComponentError::LoadCancelled);
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(ComponentError::LoadCancelled);
                    }
                    let state = *rx.borrow_and_update();
                    if state >= ComponentState::Active {
                        let table = lock(&self.inner.table);
                        return match table.infos.get(name).and_then(|i| i.instance.as_ref()) {
                            Some(instance) => Ok(Arc::clone(instance)),
                            None => Err(ComponentError::LoadCancelled),
                        };
                    }
                }
            }
        }
    }

    /// [`ComponentContext::find_component`] plus a downcast to the concrete
    /// component type.
    pub async fn find_component_as<T: Component>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, ComponentError> {
        let component = self.find_component(name).await?;
        component.as_any_arc().downcast::<T>().map_err(|_| {
            ComponentError::component(format!("component '{name}' is not of the requested type"))
        })
    }

    /// Registers a component and runs its factory in the calling task.
    ///
    /// Invoked by the per-component construction tasks during boot; a
    /// factory may also call it recursively to register helpers.
    pub async fn add_component<F, Fut>(
        &self,
        config: ComponentConfig,
        factory: F,
    ) -> Result<ComponentRef, ComponentError>
    where
        F: FnOnce(ComponentConfig, ComponentContext) -> Fut,
        Fut: Future<Output = Result<ComponentRef, ComponentError>>,
    {
        let name = config.name.clone();
        {
            let mut table = lock(&self.inner.table);
            if !self.inner.load_done.load(Ordering::Acquire) && self.inner.cancel.is_cancelled() {
                return Err(ComponentError::LoadCancelled);
            }
            let info = table
                .infos
                .entry(name.clone())
                .or_insert_with(|| ComponentInfo::new(false));
            if info.state() != ComponentState::Registered {
                return Err(ComponentError::DuplicateComponent { name });
            }
            info.advance(ComponentState::Created);
            table.created_order.push(name.clone());
        }
        self.inner
            .bus
            .publish(Event::now(EventKind::ComponentStarting).with_component(name.clone()));

        match factory(config, self.scoped(&name)).await {
            Ok(instance) => {
                {
                    let mut table = lock(&self.inner.table);
                    if let Some(info) = table.infos.get_mut(&name) {
                        info.instance = Some(Arc::clone(&instance));
                    }
                    table.settle(&name, ComponentState::Active);
                }
                self.inner
                    .bus
                    .publish(Event::now(EventKind::ComponentActive).with_component(name));
                Ok(instance)
            }
            Err(err) => {
                self.inner.bus.publish(
                    Event::now(EventKind::ComponentFailed)
                        .with_component(name.clone())
                        .with_error(err.to_string()),
                );
                let mirror = if err.is_cancellation() {
                    ComponentError::LoadCancelled
                } else {
                    ComponentError::component(err.to_string())
                };
                self.store_error(&name, err);
                Err(mirror)
            }
        }
    }

    /// Sets the load-cancellation flag and wakes every suspended
    /// [`ComponentContext::find_component`]. Idempotent.
    pub fn cancel_components_load(&self) {
        if !self.inner.cancel.is_cancelled() {
            self.inner.bus.publish(Event::now(EventKind::LoadCancelled));
            self.inner.cancel.cancel();
        }
    }

    /// Runs the post-construction hook of every component in creation order.
    pub(crate) async fn on_all_components_loaded(&self) -> Result<(), ComponentError> {
        let instances: Vec<(String, ComponentRef)> = {
            let table = lock(&self.inner.table);
            table
                .created_order
                .iter()
                .filter_map(|name| {
                    table
                        .infos
                        .get(name)
                        .and_then(|info| info.instance.clone())
                        .map(|instance| (name.clone(), instance))
                })
                .collect()
        };
        for (name, component) in instances {
            if let Err(err) = component.on_all_components_loaded().await {
                self.inner.bus.publish(
                    Event::now(EventKind::ComponentFailed)
                        .with_component(name.clone())
                        .with_error(err.to_string()),
                );
                return Err(ComponentError::ConstructionFailed {
                    name,
                    source: Box::new(err),
                });
            }
        }
        Ok(())
    }

    /// Destroys all components in reverse topological order of the observed
    /// dependency edges.
    ///
    /// Each destruction runs as a critical task on the default processor and
    /// waits until every dependent has stopped first, so a component can
    /// still use its own dependencies while tearing down.
    pub(crate) async fn clear_components(&self) {
        if !self.inner.load_done.load(Ordering::Acquire) {
            self.cancel_components_load();
        }
        let names: Vec<String> = {
            let mut table = lock(&self.inner.table);
            let names: Vec<String> = table.infos.keys().cloned().collect();
            for name in &names {
                let state = table.infos.get(name).map_or(ComponentState::Stopped, |i| i.state());
                if state == ComponentState::Active {
                    if let Some(info) = table.infos.get_mut(name) {
                        info.advance(ComponentState::Stopping);
                    }
                } else if state < ComponentState::Active {
                    // Never constructed: nothing to destroy.
                    table.settle(name, ComponentState::Stopped);
                }
            }
            names
        };
        let mut teardown = Vec::with_capacity(names.len());
        for name in names {
            let inner = Arc::clone(&self.inner);
            let task = self
                .inner
                .default_processor
                .spawn_critical(format!("teardown/{name}"), async move {
                    teardown_component(inner, name).await;
                    Ok(())
                });
            teardown.push(task);
        }
        for mut task in teardown {
            let _ = task.get().await;
        }
    }

    pub(crate) fn set_unfinished(&self, count: usize) {
        lock(&self.inner.table).unfinished = count;
    }

    pub(crate) fn note_construction_finished(&self) {
        let stall = {
            let mut table = lock(&self.inner.table);
            table.unfinished = table.unfinished.saturating_sub(1);
            table.unfinished > 0 && table.waiting == table.unfinished
        };
        if stall {
            self.inner.stalled.store(true, Ordering::Release);
            self.cancel_components_load();
        }
    }

    /// Records a boot failure raised outside the factory's own error path
    /// (missing config, factory panic).
    pub(crate) fn store_boot_error(&self, name: &str, err: ComponentError) {
        self.inner.bus.publish(
            Event::now(EventKind::ComponentFailed)
                .with_component(name)
                .with_error(err.to_string()),
        );
        self.store_error(name, err);
    }

    fn store_error(&self, name: &str, err: ComponentError) {
        let mut table = lock(&self.inner.table);
        if !err.is_cancellation() && table.first_failure.is_none() {
            table.first_failure = Some(name.to_owned());
        }
        if let Some(info) = table.infos.get_mut(name) {
            info.error = Some(err);
        }
        table.settle(name, ComponentState::Stopped);
    }

    pub(crate) fn collect_boot_outcome(&self) -> BootOutcome {
        let mut table = lock(&self.inner.table);
        let first_failure = table.first_failure.take().and_then(|name| {
            let err = table.infos.get_mut(&name).and_then(|info| info.error.take());
            err.map(|err| (name, err))
        });
        BootOutcome {
            first_failure,
            unresolved: table.unresolved(),
        }
    }

    pub(crate) fn load_was_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn is_stalled(&self) -> bool {
        self.inner.stalled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_load_done(&self) {
        self.inner.load_done.store(true, Ordering::Release);
    }

    /// State of a component as currently recorded.
    pub fn component_state(&self, name: &str) -> ComponentState {
        lock(&self.inner.table)
            .infos
            .get(name)
            .map_or(ComponentState::NotRegistered, |info| info.state())
    }

    /// Active instances in creation order; used for broadcast hooks.
    pub(crate) fn instances_snapshot(&self) -> Vec<ComponentRef> {
        let table = lock(&self.inner.table);
        table
            .created_order
            .iter()
            .filter_map(|name| table.infos.get(name).and_then(|info| info.instance.clone()))
            .collect()
    }
}

struct WaitingGuard<'a> {
    inner: &'a ContextInner,
    target: &'a str,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut table = lock(&self.inner.table);
        // A settled target already released this waiter from the counts;
        // decrement only when leaving the wait early (cancellation).
        if let Some(info) = table.infos.get_mut(self.target) {
            if info.waiters > 0 {
                info.waiters -= 1;
                table.waiting = table.waiting.saturating_sub(1);
            }
        }
    }
}

async fn teardown_component(inner: Arc<ContextInner>, name: String) {
    let dependents: Vec<watch::Receiver<ComponentState>> = {
        let table = lock(&inner.table);
        let Some(info) = table.infos.get(&name) else {
            return;
        };
        info.dependents
            .iter()
            .filter_map(|dependent| table.infos.get(dependent))
            .map(|info| info.subscribe())
            .collect()
    };
    for mut rx in dependents {
        loop {
            if *rx.borrow_and_update() == ComponentState::Stopped {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
    inner
        .bus
        .publish(Event::now(EventKind::ComponentStopping).with_component(name.clone()));
    let instance = {
        let mut table = lock(&inner.table);
        table.infos.get_mut(&name).and_then(|info| info.instance.take())
    };
    // The destructor runs inside this teardown task.
    drop(instance);
    {
        let mut table = lock(&inner.table);
        if let Some(info) = table.infos.get_mut(&name) {
            info.advance(ComponentState::Stopped);
        }
    }
    inner
        .bus
        .publish(Event::now(EventKind::ComponentStopped).with_component(name));
}
