//! Integration tests for WorkerPool
//!
//! These tests validate:
//! - Run execution with sync and async executors
//! - Outcomes handed to storage before the report arrives
//! - Failure and panic isolation
//! - Concurrency bounded by the worker count
//! - Graceful shutdown draining the queue

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use serde_json::json;
use sweep_scheduler::config::{WorkerPoolConfig, WrapMode};
use sweep_scheduler::core::{
    from_async_fn, from_fn, ComputationError, Parameters, PoolError, RunExecutor, RunOutcome,
    RunReport, RunUnit, SlotState, StorageProxy, WorkerPool,
};
use sweep_scheduler::infra::backend::MemoryBackend;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn unit(index: u64, x: i64) -> RunUnit {
    let mut params = Parameters::new();
    params.insert("x".into(), json!(x));
    RunUnit::new(index, params)
}

fn x_of(unit: &RunUnit) -> Result<i64, ComputationError> {
    unit.param("x")
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| ComputationError::failed("missing x"))
}

fn pool_with<E: RunExecutor<i64>>(
    workers: usize,
    executor: E,
    mode: WrapMode,
) -> (
    WorkerPool<i64, E>,
    MemoryBackend<i64>,
    Receiver<RunReport<i64>>,
) {
    let backend = MemoryBackend::new();
    let storage = Arc::new(StorageProxy::new(mode, Box::new(backend.clone()), 16).unwrap());
    let (tx, rx) = unbounded();
    let config = WorkerPoolConfig::new()
        .with_worker_count(workers)
        .with_max_queue_depth(64);
    let pool = WorkerPool::new(config, executor, storage, tx).unwrap();
    (pool, backend, rx)
}

fn collect(rx: &Receiver<RunReport<i64>>, count: usize) -> Vec<RunReport<i64>> {
    (0..count)
        .map(|_| rx.recv_timeout(Duration::from_secs(10)).unwrap())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[test]
fn test_sync_executor_results_reach_storage() {
    println!("\n=== test_sync_executor_results_reach_storage ===");
    let (pool, backend, rx) = pool_with(2, from_fn(|u: &RunUnit| Ok(x_of(u)? * 10)), WrapMode::Lock);

    for i in 0..6 {
        pool.submit(unit(i, i as i64)).unwrap();
    }
    let reports = collect(&rx, 6);

    let mut results: Vec<(u64, i64)> = reports
        .into_iter()
        .map(|report| match report.outcome {
            RunOutcome::Computed { result, ticket } => {
                ticket.wait().unwrap();
                (report.index, *result)
            }
            RunOutcome::Failed { error, .. } => panic!("run {} failed: {error}", report.index),
        })
        .collect();
    results.sort_unstable();
    println!("Results: {results:?}");

    assert_eq!(results, (0..6).map(|i| (i, i as i64 * 10)).collect::<Vec<_>>());
    let mut stored = backend.result_indices();
    stored.sort_unstable();
    assert_eq!(stored, (0..6).collect::<Vec<_>>());

    assert!(pool.shutdown(Duration::from_secs(5)));
    let stats = pool.stats();
    assert_eq!(stats.completed_runs, 6);
    assert_eq!(stats.failed_runs, 0);
    println!("=== test_sync_executor_results_reach_storage PASSED ===\n");
}

#[test]
fn test_async_executor() {
    println!("\n=== test_async_executor ===");
    let executor = from_async_fn(|unit: RunUnit| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, ComputationError>(x_of(&unit)? + 1)
        })
    });
    let (pool, _backend, rx) = pool_with(2, executor, WrapMode::Queue);

    pool.submit(unit(0, 41)).unwrap();
    let report = collect(&rx, 1).remove(0);
    match report.outcome {
        RunOutcome::Computed { result, ticket } => {
            ticket.wait().unwrap();
            assert_eq!(*result, 42);
        }
        RunOutcome::Failed { error, .. } => panic!("unexpected failure: {error}"),
    }
    pool.shutdown(Duration::from_secs(5));
    println!("=== test_async_executor PASSED ===\n");
}

#[test]
fn test_failures_and_panics_store_error_payloads() {
    println!("\n=== test_failures_and_panics_store_error_payloads ===");
    let executor = from_fn(|u: &RunUnit| {
        let x = x_of(u)?;
        match x {
            1 => Err(ComputationError::failed("diverged")),
            2 => panic!("solver blew up"),
            _ => Ok(x),
        }
    });
    let (pool, backend, rx) = pool_with(2, executor, WrapMode::Lock);

    for i in 0..4 {
        pool.submit(unit(i, i as i64)).unwrap();
    }
    let mut failed: Vec<(u64, String)> = collect(&rx, 4)
        .into_iter()
        .filter_map(|report| match report.outcome {
            RunOutcome::Failed { error, ticket } => {
                ticket.wait().unwrap();
                Some((report.index, error.to_string()))
            }
            RunOutcome::Computed { .. } => None,
        })
        .collect();
    failed.sort();
    println!("Failed runs: {failed:?}");

    assert_eq!(failed.len(), 2);
    assert!(failed[0].1.contains("diverged"));
    assert!(failed[1].1.contains("solver blew up"));

    let mut errors = backend.error_indices();
    errors.sort_unstable();
    assert_eq!(errors, vec![1, 2]);

    // Workers survive both failures
    assert!(pool.shutdown(Duration::from_secs(5)));
    assert_eq!(pool.stats().failed_runs, 2);
    println!("=== test_failures_and_panics_store_error_payloads PASSED ===\n");
}

#[test]
fn test_concurrency_bounded_by_worker_count() {
    println!("\n=== test_concurrency_bounded_by_worker_count ===");
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let executor = {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        from_fn(move |u: &RunUnit| {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            current.fetch_sub(1, Ordering::SeqCst);
            x_of(u)
        })
    };
    let (pool, _backend, rx) = pool_with(3, executor, WrapMode::Queue);

    let start = Instant::now();
    for i in 0..12 {
        pool.submit(unit(i, 0)).unwrap();
    }
    collect(&rx, 12);
    println!("12 runs on 3 workers took {:?}", start.elapsed());

    let peak = peak.load(Ordering::SeqCst);
    println!("Peak concurrency: {peak}");
    assert!(peak <= 3, "peak concurrency {peak} exceeded worker count");
    assert!(peak >= 2, "runs never overlapped");
    pool.shutdown(Duration::from_secs(5));
    println!("=== test_concurrency_bounded_by_worker_count PASSED ===\n");
}

#[test]
fn test_shutdown_drains_queue() {
    println!("\n=== test_shutdown_drains_queue ===");
    let executor = from_fn(|u: &RunUnit| {
        std::thread::sleep(Duration::from_millis(10));
        x_of(u)
    });
    let (pool, backend, rx) = pool_with(1, executor, WrapMode::Lock);

    for i in 0..5 {
        pool.submit(unit(i, 1)).unwrap();
    }
    assert!(pool.shutdown(Duration::from_secs(5)));
    assert_eq!(rx.try_iter().count(), 5);
    assert_eq!(backend.result_indices(), vec![0, 1, 2, 3, 4]);
    assert_eq!(pool.slot_states(), vec![SlotState::Terminated]);

    assert_eq!(pool.submit(unit(5, 1)).unwrap_err(), PoolError::PoolShutdown);
    println!("=== test_shutdown_drains_queue PASSED ===\n");
}

#[test]
fn test_shutdown_timeout_detaches_stuck_worker() {
    println!("\n=== test_shutdown_timeout_detaches_stuck_worker ===");
    let executor = from_fn(|u: &RunUnit| {
        std::thread::sleep(Duration::from_millis(500));
        x_of(u)
    });
    let (pool, _backend, _rx) = pool_with(1, executor, WrapMode::Lock);
    pool.submit(unit(0, 1)).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    assert!(!pool.shutdown(Duration::from_millis(50)));
    assert!(start.elapsed() < Duration::from_millis(400));
    println!("=== test_shutdown_timeout_detaches_stuck_worker PASSED ===\n");
}
