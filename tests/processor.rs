//! Task processor behavior: FIFO admission, overload control, cancellation,
//! deadlines and shutdown draining.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use corevisor::{
    Bus, CoroPoolConfig, Deadline, EventPoolConfig, TaskError, TaskProcessor,
    TaskProcessorConfig, TaskProcessorPools, TaskStatus,
};

fn start_processor(worker_threads: usize, queue_high_water: usize) -> Arc<TaskProcessor> {
    let pools = TaskProcessorPools::new(
        CoroPoolConfig {
            initial_size: 4,
            max_size: 64,
            stack_size: 256 * 1024,
        },
        EventPoolConfig {
            threads: 1,
            thread_name: "test-event".into(),
        },
    );
    TaskProcessor::start(
        TaskProcessorConfig {
            name: "test-processor".into(),
            worker_threads,
            thread_name: "test-worker".into(),
            queue_high_water,
            ..TaskProcessorConfig::default()
        },
        pools,
        Bus::new(64),
    )
}

fn stop_processor(processor: &Arc<TaskProcessor>) {
    processor.initiate_shutdown();
    processor.join_workers();
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn fifo_order_with_a_single_worker() {
    let processor = start_processor(1, 10_000);
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..50usize {
        let order = Arc::clone(&order);
        let task = processor
            .spawn(format!("fifo-{i}"), async move {
                order.lock().expect("lock").push(i);
                Ok(())
            })
            .expect("spawn");
        handles.push(task);
    }
    for mut task in handles {
        task.block_get().expect("task result");
    }

    let seen = order.lock().expect("lock").clone();
    assert_eq!(seen, (0..50).collect::<Vec<_>>());
    stop_processor(&processor);
}

#[test]
fn overload_rejects_and_critical_bypasses() {
    let processor = start_processor(1, 2);
    let released = Arc::new(AtomicBool::new(false));

    // Occupies the only worker until released, so the queue fills behind it.
    let hold = Arc::clone(&released);
    let mut blocker = processor
        .spawn("blocker", async move {
            while !hold.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .expect("spawn blocker");
    wait_for(|| {
        let stats = processor.stats();
        stats.queue_len == 0 && stats.alive_tasks == 1
    });

    let mut first = processor.spawn("first", async { Ok(()) }).expect("first fits");
    let mut second = processor.spawn("second", async { Ok(()) }).expect("second fits");
    let overflow = processor.spawn("overflow", async { Ok(()) });
    assert!(matches!(overflow, Err(TaskError::Overloaded)));
    assert_eq!(processor.stats().total_overloaded, 1);

    let mut critical = processor.spawn_critical("critical", async { Ok(()) });

    released.store(true, Ordering::Release);
    blocker.block_get().expect("blocker");
    first.block_get().expect("first");
    second.block_get().expect("second");
    critical.block_get().expect("critical");

    stop_processor(&processor);
}

#[test]
fn cancellation_is_sticky_and_delivered_at_suspension() {
    let processor = start_processor(1, 10_000);
    let mut task: corevisor::Task<()> = processor
        .spawn("sleeper", async {
            loop {
                corevisor::sleep(Duration::from_millis(2)).await?;
            }
        })
        .expect("spawn");

    wait_for(|| task.status() != TaskStatus::New);
    task.request_cancel();
    let result: Result<(), TaskError> = task.block_get();
    assert!(matches!(result, Err(TaskError::Cancelled)));
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert_eq!(processor.stats().total_cancelled, 1);

    stop_processor(&processor);
}

#[test]
fn critical_task_observes_cancellation_only_at_checkpoints() {
    let processor = start_processor(1, 10_000);
    let mut task: corevisor::Task<()> = processor.spawn_critical("critical-sleeper", async {
        loop {
            // Suspension points ignore the flag for critical tasks; only the
            // explicit checkpoint delivers it.
            corevisor::sleep(Duration::from_millis(2)).await?;
            corevisor::current_task::checkpoint()?;
        }
    });

    wait_for(|| task.status() != TaskStatus::New);
    task.request_cancel();
    assert!(matches!(task.block_get(), Err(TaskError::Cancelled)));

    stop_processor(&processor);
}

#[test]
fn get_consumes_the_result_exactly_once() {
    let processor = start_processor(1, 10_000);
    let mut task = processor.spawn("value", async { Ok(7usize) }).expect("spawn");

    assert_eq!(task.block_get().expect("value"), 7);
    assert!(!task.is_valid());
    assert!(matches!(task.block_get(), Err(TaskError::WrongState)));

    stop_processor(&processor);
}

#[test]
fn wait_observes_deadline_then_completion() {
    let processor = start_processor(2, 10_000);
    let slow = processor
        .spawn("slow", async {
            corevisor::sleep(Duration::from_millis(100)).await?;
            Ok(())
        })
        .expect("spawn slow");

    let mut waiter = processor
        .spawn("waiter", async move {
            let early = slow.wait_until(Deadline::after(Duration::from_millis(5))).await;
            assert!(matches!(early, Err(TaskError::DeadlineExceeded)));
            slow.wait().await?;
            Ok(())
        })
        .expect("spawn waiter");
    waiter.block_get().expect("waiter");

    stop_processor(&processor);
}

#[test]
fn detached_task_runs_to_completion() {
    let processor = start_processor(1, 10_000);
    let finished = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&finished);
    let task = processor
        .spawn("detached", async move {
            corevisor::sleep(Duration::from_millis(10)).await?;
            flag.store(true, Ordering::Release);
            Ok(())
        })
        .expect("spawn");
    task.detach();

    wait_for(|| finished.load(Ordering::Acquire));
    wait_for(|| processor.stats().alive_tasks == 0);

    stop_processor(&processor);
}

#[test]
fn yield_now_requeues_behind_ready_tasks() {
    let processor = start_processor(1, 10_000);
    let order = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(AtomicBool::new(false));

    let yielder_order = Arc::clone(&order);
    let yielder_gate = Arc::clone(&gate);
    let mut yielder = processor
        .spawn("yielder", async move {
            yielder_order.lock().expect("lock").push("yielder:start");
            // Holds the only worker until the follower is queued behind it.
            while !yielder_gate.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            corevisor::yield_now().await?;
            yielder_order.lock().expect("lock").push("yielder:resumed");
            Ok(())
        })
        .expect("spawn yielder");
    wait_for(|| !order.lock().expect("lock").is_empty());

    let follower_order = Arc::clone(&order);
    let mut follower = processor
        .spawn("follower", async move {
            follower_order.lock().expect("lock").push("follower");
            Ok(())
        })
        .expect("spawn follower");
    gate.store(true, Ordering::Release);

    yielder.block_get().expect("yielder");
    follower.block_get().expect("follower");

    let seen = order.lock().expect("lock").clone();
    assert_eq!(seen, vec!["yielder:start", "follower", "yielder:resumed"]);
    stop_processor(&processor);
}

#[test]
fn spawn_after_shutdown_yields_a_cancelled_handle() {
    let processor = start_processor(1, 10_000);
    processor.initiate_shutdown();

    let attempt = processor.spawn("late", async { Ok(()) });
    let mut late = match attempt {
        Ok(task) => task,
        Err(err) => panic!("draining spawn should yield a handle, got {err}"),
    };
    assert_eq!(late.status(), TaskStatus::Cancelled);
    assert!(matches!(late.block_get(), Err(TaskError::Cancelled)));

    let mut critical = processor.spawn_critical("late-critical", async { Ok(()) });
    assert!(matches!(critical.block_get(), Err(TaskError::Cancelled)));

    processor.join_workers();
}

#[test]
fn panicking_task_is_reported_as_failed() {
    let processor = start_processor(1, 10_000);
    let mut task: corevisor::Task<()> = processor
        .spawn("exploder", async { panic!("boom") })
        .expect("spawn");

    let result = task.block_get();
    match result {
        Err(TaskError::Panicked { message }) => assert!(message.contains("boom")),
        other => panic!("expected panic result, got {other:?}"),
    }
    assert_eq!(task.status(), TaskStatus::Failed);

    stop_processor(&processor);
}
