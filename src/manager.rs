//! # The manager: boot and shutdown orchestrator.
//!
//! Boot: build the shared pools, then the task processors (applying the
//! `CPU_LIMIT` guess to the default one), then run the component-context
//! construction as a critical task on the default processor, blocking the
//! calling thread until every component is active. Shutdown walks the
//! inverse path and always completes: teardown errors are reported on the
//! bus and swallowed.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::broadcast;

use crate::components::{ComponentContext, ComponentList, ComponentState};
use crate::config::{ComponentConfig, ManagerConfig};
use crate::error::{ComponentError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::observer::Observer;
use crate::pools::TaskProcessorPools;
use crate::processor::TaskProcessor;
use crate::sync::{read, write};

const MAX_CPU: f64 = 32.0;
const MIN_WORKER_THREADS: usize = 3;

struct ContextSlot {
    context: Option<ComponentContext>,
    cleared: bool,
}

/// Top-level lifecycle coordinator composing pools, processors and the
/// component context.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use corevisor::{
///     Component, ComponentConfig, ComponentList, ComponentRef, Manager, ManagerConfig,
/// };
///
/// struct Greeter;
///
/// #[async_trait]
/// impl Component for Greeter {
///     fn name(&self) -> &str {
///         "greeter"
///     }
/// }
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut config = ManagerConfig::default();
///     config.components.push(ComponentConfig::new("greeter"));
///
///     let components = ComponentList::new().append("greeter", |_cfg, _ctx| async move {
///         Ok(Arc::new(Greeter) as ComponentRef)
///     });
///
///     let manager = Manager::start(config, components)?;
///     // ... serve ...
///     manager.shutdown();
///     Ok(())
/// }
/// ```
pub struct Manager {
    bus: Option<Bus>,
    pools: Option<Arc<TaskProcessorPools>>,
    processors: DashMap<String, Arc<TaskProcessor>>,
    default_processor: Option<Arc<TaskProcessor>>,
    context: RwLock<ContextSlot>,
    observer_pump: Option<thread::JoinHandle<()>>,
    start_time: Instant,
    load_duration: Duration,
    stopped: bool,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager").finish_non_exhaustive()
    }
}

impl Manager {
    /// Boots the whole stack and blocks until every component is active.
    ///
    /// On failure everything already constructed is torn down before the
    /// error is returned; no threads are left running.
    pub fn start(
        config: ManagerConfig,
        components: ComponentList,
    ) -> Result<Self, ComponentError> {
        Self::boot(config, components, None)
    }

    /// [`Manager::start`] with an [`Observer`] attached before the first
    /// event is published.
    pub fn start_with_observer(
        config: ManagerConfig,
        components: ComponentList,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, ComponentError> {
        Self::boot(config, components, Some(observer))
    }

    fn boot(
        config: ManagerConfig,
        components: ComponentList,
        observer: Option<Arc<dyn Observer>>,
    ) -> Result<Self, ComponentError> {
        let bus = Bus::new(config.event_bus_capacity.max(16));
        let observer_pump = observer.and_then(|obs| spawn_observer_pump(bus.subscribe(), obs));
        bus.publish(Event::now(EventKind::ManagerStarting));
        let start_time = Instant::now();

        let pools = TaskProcessorPools::new(
            config.coro_pool.clone(),
            config.event_thread_pool.clone(),
        );
        let processors: DashMap<String, Arc<TaskProcessor>> = DashMap::new();
        for mut processor_config in config.task_processors.clone() {
            if processor_config.should_guess_cpu_limit {
                if processor_config.name == config.default_task_processor {
                    if let Some(guessed) = guess_cpu_limit(&processor_config.name, &bus) {
                        processor_config.worker_threads = guessed;
                    }
                } else {
                    bus.publish(
                        Event::now(EventKind::CpuLimitIgnored)
                            .with_processor(processor_config.name.clone())
                            .with_detail(
                                "should_guess_cpu_limit is set for a non-default task processor",
                            ),
                    );
                }
            }
            let name = processor_config.name.clone();
            let processor = TaskProcessor::start(processor_config, Arc::clone(&pools), bus.clone());
            processors.insert(name, processor);
        }

        let Some(default_processor) = processors
            .get(&config.default_task_processor)
            .map(|entry| Arc::clone(entry.value()))
        else {
            let err = ComponentError::MissingComponent {
                name: config.default_task_processor.clone(),
                detail: "default task processor is not configured".into(),
            };
            return Err(abort_boot(err, &processors, pools, bus, observer_pump));
        };

        let boot_args = BootArgs {
            components,
            configs: config.components.clone(),
            bus: bus.clone(),
            default_processor: Arc::clone(&default_processor),
        };
        let mut boot_task = default_processor.spawn_critical("boot/component-context", async move {
            Ok::<_, TaskError>(create_component_context(boot_args).await)
        });
        let boot_result = boot_task.block_get();
        drop(boot_task);
        let context = match boot_result {
            Ok(Ok(context)) => context,
            Ok(Err(err)) => {
                drop(default_processor);
                return Err(abort_boot(err, &processors, pools, bus, observer_pump));
            }
            Err(task_err) => {
                drop(default_processor);
                let err = ComponentError::Task(task_err);
                return Err(abort_boot(err, &processors, pools, bus, observer_pump));
            }
        };

        let load_duration = start_time.elapsed().max(Duration::from_nanos(1));
        bus.publish(
            Event::now(EventKind::AllComponentsLoaded)
                .with_detail(format!("load took {load_duration:?}")),
        );
        bus.publish(Event::now(EventKind::ManagerStarted));

        Ok(Self {
            bus: Some(bus),
            pools: Some(pools),
            processors,
            default_processor: Some(default_processor),
            context: RwLock::new(ContextSlot {
                context: Some(context),
                cleared: false,
            }),
            observer_pump,
            start_time,
            load_duration,
            stopped: false,
        })
    }

    /// Stops components, drains the processors and releases the pools.
    ///
    /// Also runs from `Drop`; errors never propagate out of shutdown.
    pub fn shutdown(mut self) {
        self.shutdown_impl();
    }

    /// Looks up a task processor by name.
    pub fn task_processor(&self, name: &str) -> Option<Arc<TaskProcessor>> {
        self.processors.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// The processor hosting boot, teardown and component hooks.
    pub fn default_task_processor(&self) -> Option<Arc<TaskProcessor>> {
        self.default_processor.clone()
    }

    /// How long it took for every component to become active.
    pub fn load_duration(&self) -> Duration {
        self.load_duration
    }

    /// When boot began.
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// State of a component as currently recorded by the context.
    pub fn component_state(&self, name: &str) -> ComponentState {
        let slot = read(&self.context);
        slot.context
            .as_ref()
            .map_or(ComponentState::NotRegistered, |ctx| ctx.component_state(name))
    }

    /// Forwards a log-rotation request to every component.
    ///
    /// Holds the context's shared lock for the whole request, so rotation is
    /// serialized against shutdown; once components are cleared this is a
    /// no-op.
    pub fn on_log_rotate(&self) -> Result<(), ComponentError> {
        let slot = read(&self.context);
        if slot.cleared {
            return Ok(());
        }
        let Some(context) = &slot.context else {
            return Ok(());
        };
        let Some(default_processor) = &self.default_processor else {
            return Ok(());
        };
        if let Some(bus) = &self.bus {
            bus.publish(Event::now(EventKind::LogRotate));
        }
        let instances = context.instances_snapshot();
        let mut task = default_processor.spawn_critical("hooks/log-rotate", async move {
            for component in instances {
                component
                    .on_log_rotate()
                    .await
                    .map_err(|err| TaskError::Failed {
                        reason: err.to_string(),
                    })?;
            }
            Ok(())
        });
        task.block_get().map_err(ComponentError::Task)
    }

    fn shutdown_impl(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(bus) = &self.bus {
            bus.publish(Event::now(EventKind::ManagerStopping));
        }

        let context = {
            let mut slot = write(&self.context);
            slot.cleared = true;
            slot.context.take()
        };
        if let (Some(context), Some(default_processor)) = (context, &self.default_processor) {
            let clearing = context.clone();
            let mut task = default_processor
                .spawn_critical("shutdown/clear-components", async move {
                    clearing.clear_components().await;
                    Ok(())
                });
            if let Err(err) = task.block_get() {
                if let Some(bus) = &self.bus {
                    bus.publish(
                        Event::now(EventKind::ComponentFailed)
                            .with_error(err.to_string())
                            .with_detail("failed to clear components"),
                    );
                }
            }
        }
        self.default_processor = None;

        if let Some(pools) = self.pools.take() {
            stop_processors(&self.processors, &pools);
            if Arc::strong_count(&pools) != 1 {
                if let Some(bus) = &self.bus {
                    bus.publish(
                        Event::now(EventKind::ManagerStopped)
                            .with_detail("task processor pools are still referenced"),
                    );
                }
                debug_assert_eq!(Arc::strong_count(&pools), 1);
            }
        }

        if let Some(bus) = self.bus.take() {
            bus.publish(Event::now(EventKind::ManagerStopped));
        }
        if let Some(pump) = self.observer_pump.take() {
            let _ = pump.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown_impl();
    }
}

/// Drains every processor, then joins its workers.
///
/// The poll of `active_coroutines` uses a bounded back-off; its cap is the
/// only thing this loop adds to shutdown latency.
fn stop_processors(processors: &DashMap<String, Arc<TaskProcessor>>, pools: &Arc<TaskProcessorPools>) {
    for entry in processors.iter() {
        entry.value().initiate_shutdown();
    }
    let mut backoff = Duration::from_millis(1);
    while pools.coro_pool().stats().active_coroutines > 0 {
        thread::sleep(backoff);
        backoff = (backoff * 2).min(Duration::from_millis(10));
    }
    for entry in processors.iter() {
        entry.value().join_workers();
    }
    processors.clear();
}

fn abort_boot(
    err: ComponentError,
    processors: &DashMap<String, Arc<TaskProcessor>>,
    pools: Arc<TaskProcessorPools>,
    bus: Bus,
    observer_pump: Option<thread::JoinHandle<()>>,
) -> ComponentError {
    stop_processors(processors, &pools);
    debug_assert_eq!(Arc::strong_count(&pools), 1);
    drop(pools);
    bus.publish(Event::now(EventKind::ManagerStopped));
    drop(bus);
    if let Some(pump) = observer_pump {
        let _ = pump.join();
    }
    err
}

fn spawn_observer_pump(
    mut rx: broadcast::Receiver<Event>,
    observer: Arc<dyn Observer>,
) -> Option<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("corevisor-observer".into())
        .spawn(move || loop {
            match futures::executor::block_on(rx.recv()) {
                Ok(event) => futures::executor::block_on(observer.on_event(&event)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        })
        .ok()
}

fn guess_cpu_limit(processor: &str, bus: &Bus) -> Option<usize> {
    let raw = std::env::var("CPU_LIMIT").ok()?;
    match parse_cpu_limit(&raw) {
        Some(threads) => {
            bus.publish(
                Event::now(EventKind::CpuLimitApplied)
                    .with_processor(processor)
                    .with_detail(format!("CPU_LIMIT='{raw}' -> {threads} worker threads")),
            );
            Some(threads)
        }
        None => {
            bus.publish(
                Event::now(EventKind::CpuLimitIgnored)
                    .with_detail(format!("CPU_LIMIT='{raw}' is invalid, keeping config value")),
            );
            None
        }
    }
}

/// Parses `CPU_LIMIT` values of the shape `<decimal>c`, e.g. `4c`.
///
/// Accepts 0 < n < 32 after rounding and raises the result to the minimum
/// of 3 worker threads; anything else is rejected.
fn parse_cpu_limit(raw: &str) -> Option<usize> {
    let digits = raw.strip_suffix('c')?;
    let cpu: f64 = digits.parse().ok()?;
    let cpu = cpu.round();
    if cpu > 0.0 && cpu < MAX_CPU {
        Some((cpu as usize).max(MIN_WORKER_THREADS))
    } else {
        None
    }
}

struct BootArgs {
    components: ComponentList,
    configs: Vec<ComponentConfig>,
    bus: Bus,
    default_processor: Arc<TaskProcessor>,
}

async fn create_component_context(args: BootArgs) -> Result<ComponentContext, ComponentError> {
    let BootArgs {
        components,
        configs,
        bus,
        default_processor,
    } = args;

    let mut seen = HashSet::new();
    for entry in components.entries() {
        if !seen.insert(entry.name.clone()) {
            return Err(ComponentError::DuplicateComponent {
                name: entry.name.clone(),
            });
        }
    }
    for config in &configs {
        if !components.contains(&config.name) {
            return Err(ComponentError::MissingComponent {
                name: config.name.clone(),
                detail: "present in config but not registered in the component list".into(),
            });
        }
    }

    let disabled: HashSet<String> = configs
        .iter()
        .filter(|c| !c.load_enabled)
        .map(|c| c.name.clone())
        .collect();
    let expected: Vec<String> = components.names().map(str::to_owned).collect();
    let context = ComponentContext::new(expected, disabled, bus.clone(), Arc::clone(&default_processor));

    match add_components(&context, components, configs, &bus, &default_processor).await {
        Ok(()) => Ok(context),
        Err(err) => {
            context.clear_components().await;
            Err(err)
        }
    }
}

struct FinishGuard(ComponentContext);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.note_construction_finished();
    }
}

async fn add_components(
    context: &ComponentContext,
    components: ComponentList,
    configs: Vec<ComponentConfig>,
    bus: &Bus,
    default_processor: &Arc<TaskProcessor>,
) -> Result<(), ComponentError> {
    let config_map: HashMap<String, ComponentConfig> = configs
        .into_iter()
        .map(|config| (config.name.clone(), config))
        .collect();

    let mut enabled = Vec::new();
    for entry in components.into_entries() {
        let is_disabled = config_map
            .get(&entry.name)
            .map_or(false, |config| !config.load_enabled);
        if is_disabled {
            bus.publish(Event::now(EventKind::ComponentSkipped).with_component(entry.name.clone()));
        } else {
            enabled.push(entry);
        }
    }

    context.set_unfinished(enabled.len());
    let mut tasks = Vec::with_capacity(enabled.len());
    for entry in enabled {
        let task_context = context.clone();
        let config = config_map.get(&entry.name).cloned();
        let factory = Arc::clone(&entry.factory);
        let name = entry.name;
        let task = default_processor.spawn_critical(format!("boot/{name}"), async move {
            let _finish = FinishGuard(task_context.clone());
            let Some(config) = config else {
                let err = ComponentError::MissingComponent {
                    name: name.clone(),
                    detail: "registered in the component list but missing from config".into(),
                };
                let reason = err.to_string();
                task_context.store_boot_error(&name, err);
                task_context.cancel_components_load();
                return Err(TaskError::Failed { reason });
            };
            // A panicking factory unwinds past the context's error path, so
            // catch it here and record it as a construction failure.
            let construction = task_context.add_component(config, move |cfg, ctx| factory(cfg, ctx));
            match AssertUnwindSafe(construction).catch_unwind().await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(err)) => {
                    let reason = err.to_string();
                    if !err.is_cancellation() {
                        task_context.cancel_components_load();
                    }
                    Err(TaskError::Failed { reason })
                }
                Err(payload) => {
                    let err = ComponentError::Task(TaskError::from_panic(payload));
                    let reason = err.to_string();
                    task_context.store_boot_error(&name, err);
                    task_context.cancel_components_load();
                    Err(TaskError::Failed { reason })
                }
            }
        });
        tasks.push(task);
    }

    // Errors are collected from the context tables, not the task results.
    for mut task in tasks {
        let _ = task.get().await;
    }

    let outcome = context.collect_boot_outcome();
    if let Some((name, err)) = outcome.first_failure {
        let boot_err = match err {
            stalled @ ComponentError::LoadStalled { .. } => stalled,
            err => ComponentError::ConstructionFailed {
                name,
                source: Box::new(err),
            },
        };
        return Err(boot_err);
    }
    if context.load_was_cancelled() || context.is_stalled() {
        // Only cancellations were observed; nothing names a root cause.
        return Err(ComponentError::LoadStalled {
            unresolved: outcome.unresolved,
        });
    }

    bus.publish(Event::now(EventKind::AllComponentsCreated));
    context.on_all_components_loaded().await?;
    context.mark_load_done();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_limit_accepts_plain_values() {
        assert_eq!(parse_cpu_limit("4c"), Some(4));
        assert_eq!(parse_cpu_limit("31c"), Some(31));
    }

    #[test]
    fn cpu_limit_raises_small_values_to_minimum() {
        assert_eq!(parse_cpu_limit("2c"), Some(3));
        assert_eq!(parse_cpu_limit("1c"), Some(3));
        assert_eq!(parse_cpu_limit("0.5c"), Some(3));
    }

    #[test]
    fn cpu_limit_rounds_fractions() {
        assert_eq!(parse_cpu_limit("4.4c"), Some(4));
        assert_eq!(parse_cpu_limit("4.5c"), Some(5));
    }

    #[test]
    fn cpu_limit_rejects_out_of_range() {
        assert_eq!(parse_cpu_limit("0c"), None);
        assert_eq!(parse_cpu_limit("32c"), None);
        assert_eq!(parse_cpu_limit("40c"), None);
        assert_eq!(parse_cpu_limit("-1c"), None);
    }

    #[test]
    fn cpu_limit_rejects_malformed_input() {
        assert_eq!(parse_cpu_limit("abc"), None);
        assert_eq!(parse_cpu_limit("4"), None);
        assert_eq!(parse_cpu_limit("c"), None);
        assert_eq!(parse_cpu_limit(""), None);
    }
}
