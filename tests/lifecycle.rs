//! Component lifecycle scenarios: boot graphs, failure propagation and
//! teardown ordering through the manager.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use corevisor::{
    Component, ComponentConfig, ComponentError, ComponentList, ComponentRef, ComponentState,
    Event, EventKind, Manager, ManagerConfig, Observer, TaskError,
};

/// Shared recorder for construction, hook and drop ordering.
#[derive(Default)]
struct Probe {
    entries: Mutex<Vec<String>>,
}

impl Probe {
    fn push(&self, entry: impl Into<String>) {
        self.entries.lock().expect("probe lock").push(entry.into());
    }

    fn take(&self) -> Vec<String> {
        self.entries.lock().expect("probe lock").clone()
    }

    fn position(&self, entry: &str) -> Option<usize> {
        self.take().iter().position(|e| e == entry)
    }
}

struct Unit {
    name: &'static str,
    probe: Arc<Probe>,
    // Dependencies stay alive until this unit drops, like any real holder.
    #[allow(dead_code)]
    deps: Vec<ComponentRef>,
}

#[async_trait]
impl Component for Unit {
    fn name(&self) -> &str {
        self.name
    }

    async fn on_all_components_loaded(&self) -> Result<(), ComponentError> {
        self.probe.push(format!("loaded:{}", self.name));
        Ok(())
    }

    async fn on_log_rotate(&self) -> Result<(), ComponentError> {
        self.probe.push(format!("rotate:{}", self.name));
        Ok(())
    }
}

impl Drop for Unit {
    fn drop(&mut self) {
        self.probe.push(format!("drop:{}", self.name));
    }
}

fn manager_config(names: &[&str]) -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.coro_pool.initial_size = 4;
    config.task_processors[0].worker_threads = 1;
    config.components = names.iter().map(|n| ComponentConfig::new(*n)).collect();
    config
}

/// Registers a unit that resolves `deps` in order before becoming active.
fn unit(
    list: ComponentList,
    name: &'static str,
    probe: &Arc<Probe>,
    deps: &'static [&'static str],
) -> ComponentList {
    let probe = Arc::clone(probe);
    list.append(name, move |_cfg, ctx| {
        let probe = Arc::clone(&probe);
        async move {
            let mut held = Vec::new();
            for dep in deps {
                held.push(ctx.find_component(dep).await?);
            }
            probe.push(format!("active:{name}"));
            Ok(Arc::new(Unit {
                name,
                probe: Arc::clone(&probe),
                deps: held,
            }) as ComponentRef)
        }
    })
}

#[test]
fn trivial_boot_activates_and_destroys_once() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &[]);

    let manager = Manager::start(manager_config(&["a"]), list).expect("boot");
    assert_eq!(manager.component_state("a"), ComponentState::Active);
    assert!(manager.load_duration() > Duration::ZERO);
    manager.shutdown();

    let events = probe.take();
    assert_eq!(events.iter().filter(|e| *e == "active:a").count(), 1);
    assert_eq!(events.iter().filter(|e| *e == "drop:a").count(), 1);
}

#[test]
fn linear_chain_constructs_bottom_up_and_destroys_top_down() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &["b"]);
    let list = unit(list, "b", &probe, &["c"]);
    let list = unit(list, "c", &probe, &[]);

    let manager = Manager::start(manager_config(&["a", "b", "c"]), list).expect("boot");
    for name in ["a", "b", "c"] {
        assert_eq!(manager.component_state(name), ComponentState::Active);
    }
    manager.shutdown();

    let events = probe.take();
    let actives: Vec<&String> = events.iter().filter(|e| e.starts_with("active:")).collect();
    assert_eq!(actives, ["active:c", "active:b", "active:a"]);
    let drops: Vec<&String> = events.iter().filter(|e| e.starts_with("drop:")).collect();
    assert_eq!(drops, ["drop:a", "drop:b", "drop:c"]);
}

#[test]
fn diamond_constructs_shared_dependency_once() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &["b", "c"]);
    let list = unit(list, "b", &probe, &["d"]);
    let list = unit(list, "c", &probe, &["d"]);
    let list = unit(list, "d", &probe, &[]);

    let manager = Manager::start(manager_config(&["a", "b", "c", "d"]), list).expect("boot");
    manager.shutdown();

    let events = probe.take();
    assert_eq!(events.iter().filter(|e| *e == "active:d").count(), 1);
    let first_active = probe_index(&events, "active:d");
    let last_active = probe_index(&events, "active:a");
    for name in ["b", "c"] {
        let pos = probe_index(&events, &format!("active:{name}"));
        assert!(first_active < pos && pos < last_active);
    }
    let drop_a = probe_index(&events, "drop:a");
    let drop_d = probe_index(&events, "drop:d");
    for name in ["b", "c"] {
        let pos = probe_index(&events, &format!("drop:{name}"));
        assert!(drop_a < pos && pos < drop_d);
    }
}

fn probe_index(events: &[String], entry: &str) -> usize {
    events
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing probe entry '{entry}' in {events:?}"))
}

#[test]
fn dependency_cycle_fails_boot_with_the_full_path() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &["b"]);
    let list = unit(list, "b", &probe, &["a"]);

    let err = Manager::start(manager_config(&["a", "b"]), list).expect_err("cycle must fail");
    match err {
        ComponentError::ConstructionFailed { source, .. } => match *source {
            ComponentError::DependencyCycle { path } => {
                assert_eq!(path.len(), 3);
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        },
        other => panic!("expected ConstructionFailed, got {other:?}"),
    }
    // Neither component became active.
    assert!(probe.position("active:a").is_none());
    assert!(probe.position("active:b").is_none());
}

#[test]
fn disabled_dependency_fails_boot_without_running_its_factory() {
    let probe = Arc::new(Probe::default());
    let disabled_ran = Arc::new(AtomicBool::new(false));

    let list = unit(ComponentList::new(), "a", &probe, &["b"]);
    let ran = Arc::clone(&disabled_ran);
    let list = list.append("b", move |_cfg, _ctx| {
        let ran = Arc::clone(&ran);
        async move {
            ran.store(true, Ordering::Release);
            Err(ComponentError::component("must not run"))
        }
    });

    let mut config = manager_config(&["a"]);
    config.components.push(ComponentConfig::new("b").disabled());

    let err = Manager::start(config, list).expect_err("disabled dep must fail boot");
    match err {
        ComponentError::ConstructionFailed { name, source } => {
            assert_eq!(name, "a");
            match *source {
                ComponentError::Disabled { name } => assert_eq!(name, "b"),
                other => panic!("expected Disabled, got {other:?}"),
            }
        }
        other => panic!("expected ConstructionFailed, got {other:?}"),
    }
    assert!(!disabled_ran.load(Ordering::Acquire));
    assert!(probe.position("active:a").is_none());
}

#[test]
fn factory_failure_cancels_the_rest_of_the_load() {
    let probe = Arc::new(Probe::default());

    let list = ComponentList::new().append("failing", |_cfg, _ctx| async move {
        corevisor::sleep(Duration::from_millis(50)).await?;
        Err(ComponentError::component("boom"))
    });
    let waiter_probe = Arc::clone(&probe);
    let list = list.append("waiter", move |_cfg, ctx| {
        let probe = Arc::clone(&waiter_probe);
        async move {
            match ctx.find_component("failing").await {
                Ok(_) => panic!("the failing component must never become active"),
                Err(err) => {
                    probe.push(format!("waiter:{}", err.as_label()));
                    Err(err)
                }
            }
        }
    });

    let err = Manager::start(manager_config(&["failing", "waiter"]), list)
        .expect_err("boot must surface the root cause");
    match err {
        ComponentError::ConstructionFailed { name, source } => {
            assert_eq!(name, "failing");
            match *source {
                ComponentError::Component { reason } => assert!(reason.contains("boom")),
                other => panic!("expected the factory error, got {other:?}"),
            }
        }
        other => panic!("expected ConstructionFailed, got {other:?}"),
    }
    assert_eq!(
        probe.take(),
        vec!["waiter:components_load_cancelled".to_string()]
    );
}

#[test]
fn panicking_factory_fails_boot_with_the_panic_as_cause() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &[]);
    let list = list.append("exploder", |_cfg, _ctx| async move {
        panic!("factory blew up");
    });

    let err = Manager::start(manager_config(&["a", "exploder"]), list)
        .expect_err("a panicking factory must fail boot");
    match err {
        ComponentError::ConstructionFailed { name, source } => {
            assert_eq!(name, "exploder");
            match *source {
                ComponentError::Task(TaskError::Panicked { message }) => {
                    assert!(message.contains("factory blew up"));
                }
                other => panic!("expected the panic as cause, got {other:?}"),
            }
        }
        other => panic!("expected ConstructionFailed, got {other:?}"),
    }
}

#[test]
fn panicking_factory_cancels_waiting_factories() {
    let probe = Arc::new(Probe::default());
    let waiter_probe = Arc::clone(&probe);
    let list = ComponentList::new()
        .append("exploder", |_cfg, _ctx| async move {
            corevisor::sleep(Duration::from_millis(10)).await?;
            panic!("factory blew up");
        })
        .append("waiter", move |_cfg, ctx| {
            let probe = Arc::clone(&waiter_probe);
            async move {
                match ctx.find_component("exploder").await {
                    Ok(_) => panic!("the exploder must never become active"),
                    Err(err) => {
                        probe.push(format!("waiter:{}", err.as_label()));
                        Err(err)
                    }
                }
            }
        });

    let err = Manager::start(manager_config(&["exploder", "waiter"]), list)
        .expect_err("boot must surface the panic as root cause");
    match err {
        ComponentError::ConstructionFailed { name, .. } => assert_eq!(name, "exploder"),
        other => panic!("expected ConstructionFailed, got {other:?}"),
    }
    assert_eq!(
        probe.take(),
        vec!["waiter:components_load_cancelled".to_string()]
    );
}

#[test]
fn duplicate_component_names_fail_before_any_task() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &[]);
    let list = unit(list, "a", &probe, &[]);

    let err = Manager::start(manager_config(&["a"]), list).expect_err("duplicate must fail");
    assert!(matches!(err, ComponentError::DuplicateComponent { name } if name == "a"));
    assert!(probe.take().is_empty());
}

#[test]
fn config_entry_without_registration_fails_deterministically() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &[]);

    let err = Manager::start(manager_config(&["a", "ghost"]), list)
        .expect_err("unknown config entry must fail");
    assert!(matches!(err, ComponentError::MissingComponent { name, .. } if name == "ghost"));
    assert!(probe.take().is_empty());
}

#[test]
fn registration_without_config_fails_that_component() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &[]);
    let list = unit(list, "unconfigured", &probe, &[]);

    let err = Manager::start(manager_config(&["a"]), list)
        .expect_err("missing config must fail boot");
    match err {
        ComponentError::ConstructionFailed { name, source } => {
            assert_eq!(name, "unconfigured");
            assert!(matches!(*source, ComponentError::MissingComponent { .. }));
        }
        other => panic!("expected ConstructionFailed, got {other:?}"),
    }
}

#[test]
fn loaded_hooks_run_in_creation_order_after_boot() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &["b"]);
    let list = unit(list, "b", &probe, &[]);

    let manager = Manager::start(manager_config(&["a", "b"]), list).expect("boot");
    manager.shutdown();

    let events = probe.take();
    // With one worker the construction tasks start in registration order.
    let hooks: Vec<&String> = events.iter().filter(|e| e.starts_with("loaded:")).collect();
    assert_eq!(hooks, ["loaded:a", "loaded:b"]);
    // Hooks run only after every component is active.
    assert!(probe_index(&events, "active:a") < probe_index(&events, "loaded:a"));
}

struct FailingHook;

#[async_trait]
impl Component for FailingHook {
    fn name(&self) -> &str {
        "failing-hook"
    }

    async fn on_all_components_loaded(&self) -> Result<(), ComponentError> {
        Err(ComponentError::component("hook refused"))
    }
}

#[test]
fn failing_loaded_hook_aborts_boot_and_tears_down() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &[]);
    let list = list.append("failing-hook", |_cfg, _ctx| async move {
        Ok(Arc::new(FailingHook) as ComponentRef)
    });

    let err = Manager::start(manager_config(&["a", "failing-hook"]), list)
        .expect_err("hook failure must abort boot");
    match err {
        ComponentError::ConstructionFailed { name, .. } => assert_eq!(name, "failing-hook"),
        other => panic!("expected ConstructionFailed, got {other:?}"),
    }
    // The already-active component was destroyed during the abort.
    assert!(probe.position("drop:a").is_some());
}

#[test]
fn log_rotation_reaches_every_component() {
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &[]);
    let list = unit(list, "b", &probe, &[]);

    let manager = Manager::start(manager_config(&["a", "b"]), list).expect("boot");
    manager.on_log_rotate().expect("rotate");
    manager.shutdown();

    let events = probe.take();
    assert!(events.contains(&"rotate:a".to_string()));
    assert!(events.contains(&"rotate:b".to_string()));
}

#[test]
fn cpu_limit_env_drives_default_processor_sizing() {
    // One test owns the CPU_LIMIT variable; parallel tests never read it
    // unless should_guess_cpu_limit is set.
    let boot = |limit: Option<&str>, configured: usize| {
        match limit {
            Some(value) => std::env::set_var("CPU_LIMIT", value),
            None => std::env::remove_var("CPU_LIMIT"),
        }
        let mut config = manager_config(&[]);
        config.task_processors[0].worker_threads = configured;
        config.task_processors[0].should_guess_cpu_limit = true;
        let manager = Manager::start(config, ComponentList::new()).expect("boot");
        let threads = manager
            .default_task_processor()
            .expect("default processor")
            .worker_threads();
        manager.shutdown();
        threads
    };

    assert_eq!(boot(Some("4c"), 2), 4);
    assert_eq!(boot(Some("2c"), 5), 3);
    assert_eq!(boot(Some("abc"), 2), 2);
    assert_eq!(boot(Some("40c"), 2), 2);
    assert_eq!(boot(None, 2), 2);
    std::env::remove_var("CPU_LIMIT");
}

struct CollectingObserver {
    kinds: Mutex<Vec<EventKind>>,
    seen: AtomicUsize,
}

#[async_trait]
impl Observer for CollectingObserver {
    async fn on_event(&self, event: &Event) {
        self.kinds.lock().expect("observer lock").push(event.kind);
        self.seen.fetch_add(1, Ordering::Release);
    }
}

#[test]
fn observer_sees_the_whole_lifecycle() {
    let observer = Arc::new(CollectingObserver {
        kinds: Mutex::new(Vec::new()),
        seen: AtomicUsize::new(0),
    });
    let probe = Arc::new(Probe::default());
    let list = unit(ComponentList::new(), "a", &probe, &[]);

    let manager =
        Manager::start_with_observer(
            manager_config(&["a"]),
            list,
            Arc::clone(&observer) as Arc<dyn Observer>,
        )
            .expect("boot");
    manager.shutdown();

    let kinds = observer.kinds.lock().expect("observer lock").clone();
    for expected in [
        EventKind::ManagerStarting,
        EventKind::ComponentStarting,
        EventKind::ComponentActive,
        EventKind::AllComponentsLoaded,
        EventKind::ManagerStarted,
        EventKind::ManagerStopping,
        EventKind::ComponentStopped,
        EventKind::ManagerStopped,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
    }
}
