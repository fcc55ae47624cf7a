use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use veda_exec::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn executor(workers: usize) -> ScheduledExecutor {
    ScheduledExecutor::new(PoolConfig::fixed(workers)).unwrap()
}

#[test]
fn test_fixed_rate_overrun_skips_missed_ticks() {
    init_tracing();
    let exec = executor(2);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let s = starts.clone();

    let handle = exec
        .schedule_at_fixed_rate(
            move || {
                s.lock().push(Instant::now());
                thread::sleep(Duration::from_millis(250));
            },
            Duration::ZERO,
            Duration::from_millis(100),
        )
        .unwrap();

    thread::sleep(Duration::from_secs(1));
    let runs = handle.run_count();
    handle.cancel();

    assert!((3..=4).contains(&runs), "ran {} times", runs);
    let starts = starts.lock();
    for pair in starts.windows(2) {
        // never overlapping, never bursting
        assert!(pair[1] - pair[0] >= Duration::from_millis(250));
    }
}

#[test]
fn test_fixed_rate_keeps_period_when_fast() {
    let exec = executor(1);
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();

    let handle = exec
        .schedule_at_fixed_rate(
            move || {
                r.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(20),
            Duration::from_millis(50),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(400));
    handle.cancel();
    let n = runs.load(Ordering::SeqCst);
    assert!((5..=8).contains(&n), "ran {} times", n);
}

#[test]
fn test_fixed_delay_measures_from_completion() {
    let exec = executor(1);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let s = starts.clone();

    let handle = exec
        .schedule_with_fixed_delay(
            move || {
                s.lock().push(Instant::now());
                thread::sleep(Duration::from_millis(50));
            },
            Duration::ZERO,
            Duration::from_millis(50),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(500));
    handle.cancel();

    let starts = starts.lock();
    assert!(starts.len() >= 2);
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }
}

#[test]
fn test_delayed_tasks_fire_in_due_order() {
    let exec = executor(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = [90u64, 30, 60]
        .iter()
        .map(|&ms| {
            let order = order.clone();
            exec.schedule_once(move || order.lock().push(ms), Duration::from_millis(ms))
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*order.lock(), vec![30, 60, 90]);
}

#[test]
fn test_cancelled_periodic_stops_running() {
    let exec = executor(1);
    let handle = exec
        .schedule_at_fixed_rate(|| {}, Duration::ZERO, Duration::from_millis(10))
        .unwrap();

    thread::sleep(Duration::from_millis(60));
    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert!(handle.is_cancelled());
    assert_eq!(handle.join(), Err(Error::Cancelled));

    // an occurrence already dispatched may still finish
    thread::sleep(Duration::from_millis(30));
    let after_cancel = handle.run_count();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(handle.run_count(), after_cancel);
    assert!(after_cancel >= 1);
}

#[test]
fn test_periodic_failure_is_kept_on_handle() {
    init_tracing();
    let exec = executor(1);
    let handle = exec
        .schedule_at_fixed_rate(
            || panic!("sensor offline"),
            Duration::ZERO,
            Duration::from_millis(10),
        )
        .unwrap();

    assert!(handle.wait_timeout(Duration::from_secs(2)));
    assert_eq!(handle.status(), TaskStatus::Failed);
    assert_eq!(handle.run_count(), 0);
    assert_eq!(
        handle.join(),
        Err(Error::TaskFailed("sensor offline".into()))
    );
}

#[test]
fn test_shutdown_then_terminate() {
    let exec = executor(2);
    let periodic = exec
        .schedule_with_fixed_delay(|| {}, Duration::ZERO, Duration::from_millis(5))
        .unwrap();
    let delayed = exec.schedule_once(|| "late", Duration::from_millis(50)).unwrap();

    exec.shutdown();
    exec.shutdown();
    assert!(periodic.is_cancelled());
    assert!(matches!(
        exec.schedule_at_fixed_rate(|| {}, Duration::ZERO, Duration::from_millis(5)),
        Err(Error::Shutdown)
    ));

    assert_eq!(delayed.join(), Ok("late"));
    assert!(exec.await_termination(Duration::from_secs(5)));
    assert!(exec.pool().is_terminated());
}

#[test]
fn test_submit_runs_immediately() {
    let exec = executor(1);
    let handle = exec.submit(|| 2 + 2).unwrap();
    assert_eq!(handle.join(), Ok(4));
    assert_eq!(exec.scheduled(), 0);
}
