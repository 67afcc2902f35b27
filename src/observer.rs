//! # Observer API for runtime events.
//!
//! An [`Observer`] consumes [`Event`]s pumped off the bus by the manager on
//! a dedicated thread, so events published during shutdown are still seen.
//! [`LogObserver`] is a stdout reference implementation; production services
//! plug their logging subsystem in here.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Consumes runtime lifecycle events.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Called once per published event, in sequence order.
    async fn on_event(&self, event: &Event);
}

/// Reference observer that writes events to stdout.
pub struct LogObserver;

#[async_trait]
impl Observer for LogObserver {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::ManagerStarting => println!("[manager-starting]"),
            EventKind::ManagerStarted => println!("[manager-started]"),
            EventKind::ManagerStopping => println!("[manager-stopping]"),
            EventKind::ManagerStopped => println!("[manager-stopped]"),
            EventKind::LogRotate => println!("[log-rotate]"),
            EventKind::ComponentStarting => {
                println!("[component-starting] component={:?}", e.component)
            }
            EventKind::ComponentActive => {
                println!("[component-active] component={:?}", e.component)
            }
            EventKind::ComponentFailed => {
                println!(
                    "[component-failed] component={:?} err={:?}",
                    e.component, e.error
                )
            }
            EventKind::ComponentSkipped => {
                println!("[component-skipped] component={:?}", e.component)
            }
            EventKind::ComponentStopping => {
                println!("[component-stopping] component={:?}", e.component)
            }
            EventKind::ComponentStopped => {
                println!("[component-stopped] component={:?}", e.component)
            }
            EventKind::AllComponentsCreated => println!("[all-components-created]"),
            EventKind::AllComponentsLoaded => {
                println!("[all-components-loaded] detail={:?}", e.detail)
            }
            EventKind::LoadCancelled => println!("[components-load-cancelled]"),
            EventKind::ProcessorStarted => {
                println!("[processor-started] processor={:?}", e.processor)
            }
            EventKind::ProcessorShutdown => {
                println!("[processor-shutdown] processor={:?}", e.processor)
            }
            EventKind::TaskFailed => {
                println!("[task-failed] task={:?} err={:?}", e.task, e.error)
            }
            EventKind::TaskTraced => {
                println!(
                    "[task-traced] task={:?} processor={:?}",
                    e.task, e.processor
                )
            }
            EventKind::CpuLimitApplied => {
                println!(
                    "[cpu-limit-applied] processor={:?} detail={:?}",
                    e.processor, e.detail
                )
            }
            EventKind::CpuLimitIgnored => {
                println!("[cpu-limit-ignored] detail={:?}", e.detail)
            }
        }
    }
}
