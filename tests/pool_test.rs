use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use veda_exec::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn abort_pool(core: usize, max: usize, capacity: usize) -> WorkerPool {
    let config = PoolConfig::builder()
        .core_size(core)
        .max_size(max)
        .queue_capacity(capacity)
        .rejection_policy(RejectionPolicy::Abort)
        .build()
        .unwrap();
    WorkerPool::new(config).unwrap()
}

#[test]
fn test_saturation_rejects_exactly_one() {
    init_tracing();
    for &(core, max, capacity) in &[(1, 1, 0), (1, 2, 2), (2, 4, 3), (3, 3, 1), (2, 5, 0)] {
        let pool = abort_pool(core, max, capacity);
        let gate = Arc::new(CountdownLatch::new(1));
        let submitters = max + capacity + 1;
        let start = Arc::new(CyclicBarrier::new(submitters));

        let threads: Vec<_> = (0..submitters)
            .map(|_| {
                let (pool, gate, start) = (pool.clone(), gate.clone(), start.clone());
                thread::spawn(move || {
                    start.wait().unwrap();
                    pool.submit(move || gate.wait())
                })
            })
            .collect();
        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(Error::Rejected)))
            .count();
        assert_eq!(rejected, 1, "core={} max={} cap={}", core, max, capacity);

        gate.count_down();
        for handle in results.into_iter().flatten() {
            assert_eq!(handle.join(), Ok(()));
        }
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.stats().rejected, 1);
    }
}

#[test]
fn test_seven_instant_tasks_on_small_pool() {
    let pool = abort_pool(2, 4, 2);
    let start = Arc::new(CyclicBarrier::new(7));
    let ran = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..7)
        .map(|i| {
            let (pool, start, ran) = (pool.clone(), start.clone(), ran.clone());
            thread::spawn(move || {
                start.wait().unwrap();
                pool.submit(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    i
                })
            })
        })
        .collect();

    let mut rejected = 0;
    let mut completed = 0;
    for submitter in submitters {
        match submitter.join().unwrap() {
            Ok(handle) => {
                handle.join().unwrap();
                completed += 1;
            }
            Err(Error::Rejected) => rejected += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert!(rejected <= 1);
    assert_eq!(completed + rejected, 7);
    assert_eq!(ran.load(Ordering::SeqCst), completed);
}

#[test]
fn test_fifo_dispatch_order() {
    let pool = WorkerPool::new(PoolConfig::elastic(1, 1, 32)).unwrap();
    let gate = Arc::new(CountdownLatch::new(1));
    let g = gate.clone();
    pool.execute(move || g.wait()).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..20 {
        let order = order.clone();
        pool.execute(move || order.lock().push(i)).unwrap();
    }
    assert_eq!(pool.queued(), 20);

    gate.count_down();
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_shutdown_is_idempotent() {
    let pool = WorkerPool::new(PoolConfig::fixed(2)).unwrap();
    let handle = pool.submit(|| 42).unwrap();

    pool.shutdown();
    pool.shutdown();
    assert!(pool.is_shutdown());
    assert_eq!(pool.submit(|| 0).unwrap_err(), Error::Shutdown);
    assert_eq!(pool.execute(|| {}).unwrap_err(), Error::Shutdown);

    assert_eq!(handle.join(), Ok(42));
    assert!(pool.await_termination(Duration::from_secs(5)));
    pool.shutdown();
    assert!(pool.is_terminated());
}

#[test]
fn test_failures_stay_on_handles() {
    let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();

    let panicked = pool.submit(|| -> u32 { panic!("worker boom") }).unwrap();
    let errored = pool
        .submit_fallible(|| -> std::result::Result<u32, String> { Err("no data".to_string()) })
        .unwrap();
    let fine = pool.submit(|| 5u32).unwrap();

    assert_eq!(panicked.join(), Err(Error::TaskFailed("worker boom".into())));
    assert_eq!(errored.join(), Err(Error::TaskFailed("no data".into())));
    assert_eq!(fine.join(), Ok(5));
    assert_eq!(pool.pool_size(), 1);

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    let stats = pool.stats();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.completed, 1);
}

#[test]
fn test_cooperative_cancellation_of_running_task() {
    let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();
    let started = Arc::new(CountdownLatch::new(1));
    let s = started.clone();
    let handle = pool
        .submit(move || {
            s.count_down();
            let mut spins = 0u64;
            while !cancellation_requested() {
                spins += 1;
                thread::sleep(Duration::from_millis(1));
            }
            spins
        })
        .unwrap();

    started.wait();
    assert!(handle.cancel());
    assert!(handle.is_cancelled());
    assert_eq!(handle.join(), Err(Error::Cancelled));

    // the worker is free again once the task notices
    let next = pool.submit(|| "next").unwrap();
    assert_eq!(next.join_timeout(Duration::from_secs(2)), Ok("next"));
}

#[test]
fn test_join_timeout_on_slow_task() {
    let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();
    let handle = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(100));
            1
        })
        .unwrap();

    assert_eq!(
        handle.join_timeout(Duration::from_millis(10)),
        Err(Error::Timeout)
    );
    assert_eq!(handle.join(), Ok(1));
    assert_eq!(handle.join(), Err(Error::AlreadyRetrieved));
}

#[test]
fn test_custom_policy_sees_saturation() {
    init_tracing();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let policy = RejectionPolicy::custom(move |ctx: &RejectionContext| {
        s.lock().push((ctx.pool_size, ctx.queued));
        RejectionAction::RunOnCaller
    });
    let config = PoolConfig::builder()
        .core_size(1)
        .max_size(1)
        .queue_capacity(1)
        .rejection_policy(policy)
        .build()
        .unwrap();
    let pool = WorkerPool::new(config).unwrap();

    let gate = Arc::new(CountdownLatch::new(1));
    let g = gate.clone();
    pool.execute(move || g.wait()).unwrap();
    pool.execute(|| {}).unwrap();

    let caller = thread::current().id();
    let handle = pool.submit(move || thread::current().id() == caller).unwrap();
    assert_eq!(handle.join(), Ok(true));
    assert_eq!(*seen.lock(), vec![(1, 1)]);

    gate.count_down();
}

#[test]
fn test_task_panics_bypass_error_sink() {
    let reports = Arc::new(AtomicUsize::new(0));
    let r = reports.clone();
    let config = PoolConfig::builder()
        .core_size(1)
        .max_size(1)
        .error_handler(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let pool = WorkerPool::new(config).unwrap();

    // task panics are captured on the handle, not reported as engine failures
    pool.execute(|| panic!("contained")).unwrap();
    assert_eq!(pool.submit(|| 1).unwrap().join(), Ok(1));
    assert_eq!(reports.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unbounded_keep_alive_with_core_timeout() {
    init_tracing();
    let reports = Arc::new(AtomicUsize::new(0));
    let r = reports.clone();
    let config = PoolConfig::builder()
        .core_size(1)
        .max_size(1)
        .keep_alive(Duration::MAX)
        .allow_core_timeout(true)
        .error_handler(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let pool = WorkerPool::new(config).unwrap();

    assert_eq!(pool.submit(|| 1).unwrap().join(), Ok(1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(reports.load(Ordering::SeqCst), 0);
    assert_eq!(pool.pool_size(), 1);
    assert_eq!(pool.stats().largest_pool_size, 1);

    let second = pool.submit(|| 2).unwrap();
    assert_eq!(second.join_timeout(Duration::MAX), Ok(2));
    pool.shutdown();
    assert!(pool.await_termination(Duration::MAX));
}
