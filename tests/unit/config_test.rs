//! Tests for configuration validation and loading

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use sweep_scheduler::config::{PoolConfig, SweepConfig, WorkerPoolConfig, WrapMode};

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn test_pool_config_defaults_are_valid() {
    let cfg = PoolConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(!cfg.use_pool);
    assert_eq!(cfg.wrap_mode, WrapMode::Lock);
    assert!(cfg.caps().is_unlimited());
}

#[test]
fn test_pool_config_invalid_worker_count() {
    let cfg = PoolConfig {
        worker_count: 0,
        ..PoolConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_pool_config_invalid_caps() {
    for cap in [0.0, -5.0, 100.5, f64::NAN] {
        let cfg = PoolConfig {
            cpu_cap: cap,
            ..PoolConfig::default()
        };
        assert!(cfg.validate().is_err(), "cpu cap {cap} should be rejected");
    }
}

#[test]
fn test_direct_mode_rejected_with_pool() {
    let cfg = PoolConfig {
        use_pool: true,
        wrap_mode: WrapMode::Direct,
        ..PoolConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("direct"), "{err}");

    let inline = PoolConfig {
        use_pool: false,
        wrap_mode: WrapMode::Direct,
        ..PoolConfig::default()
    };
    assert!(inline.validate().is_ok());
}

#[test]
fn test_worker_pool_config_validation() {
    assert!(WorkerPoolConfig::new().with_worker_count(2).validate().is_ok());
    assert!(WorkerPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_max_queue_depth(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_thread_stack_size(1024).validate().is_err());
}

#[test]
fn test_drain_timeout_keeps_sub_second_precision() {
    let cfg = SweepConfig::new().with_drain_timeout(Duration::from_millis(1500));
    assert_eq!(cfg.drain_timeout(), Some(Duration::from_millis(1500)));

    let cfg = SweepConfig::new().with_drain_timeout(Duration::from_millis(500));
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.drain_timeout(), Some(Duration::from_millis(500)));

    let err = SweepConfig::new()
        .with_drain_timeout(Duration::ZERO)
        .validate()
        .unwrap_err();
    assert!(err.contains("drain_timeout_ms"));
}

#[test]
fn test_sweep_config_builders() {
    let cfg = SweepConfig::new()
        .with_worker_count(3)
        .with_use_pool(true)
        .with_wrap_mode(WrapMode::Queue)
        .with_cpu_cap(80.0)
        .with_continue_dir("/tmp/ledgers")
        .with_drain_timeout(Duration::from_secs(30))
        .with_scratch_root("/tmp/scratch");

    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.worker_pool_config().worker_count, 3);
    assert_eq!(cfg.drain_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(
        cfg.ledger_path("lif"),
        PathBuf::from("/tmp/ledgers/lif.ledger.jsonl")
    );
    assert_eq!(
        cfg.scratch_dir("lif", "run_00000007"),
        Some(PathBuf::from("/tmp/scratch/lif/run_00000007"))
    );
}

#[test]
fn test_sweep_config_from_json() {
    let cfg = SweepConfig::from_json_str(
        r#"{
            "pool": { "worker_count": 2, "use_pool": true, "wrap_mode": "queue", "memory_cap": 75.0 },
            "continuable": false,
            "immediate_postproc": true
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.pool.worker_count, 2);
    assert_eq!(cfg.pool.wrap_mode, WrapMode::Queue);
    assert!((cfg.pool.memory_cap - 75.0).abs() < f64::EPSILON);
    assert!(!cfg.continuable);
    assert!(cfg.immediate_postproc);
    // untouched fields keep defaults
    assert!(cfg.clean_up_runs);

    assert!(SweepConfig::from_json_str(r#"{"pool": {"worker_count": 0}}"#).is_err());
    assert!(SweepConfig::from_json_str("not json").is_err());
}

#[test]
fn test_sweep_config_from_env_map() {
    let cfg = SweepConfig::from_env_map(&env(&[
        ("SWEEP_WORKER_COUNT", "6"),
        ("SWEEP_USE_POOL", "true"),
        ("SWEEP_WRAP_MODE", "queue"),
        ("SWEEP_CPU_CAP", "90"),
        ("SWEEP_CONTINUE_DIR", "state"),
        ("SWEEP_DRAIN_TIMEOUT_MS", "12500"),
        ("SWEEP_SCRATCH_ROOT", " "),
    ]))
    .unwrap();

    assert_eq!(cfg.pool.worker_count, 6);
    assert!(cfg.pool.use_pool);
    assert_eq!(cfg.pool.wrap_mode, WrapMode::Queue);
    assert!((cfg.pool.cpu_cap - 90.0).abs() < f64::EPSILON);
    assert_eq!(cfg.continue_dir, PathBuf::from("state"));
    assert_eq!(cfg.drain_timeout(), Some(Duration::from_millis(12_500)));
    // blank values are treated as unset
    assert!(cfg.scratch_root.is_none());
}

#[test]
fn test_sweep_config_from_env_map_rejects_bad_values() {
    let err = SweepConfig::from_env_map(&env(&[("SWEEP_WORKER_COUNT", "many")])).unwrap_err();
    assert!(err.contains("SWEEP_WORKER_COUNT"), "{err}");

    let err = SweepConfig::from_env_map(&env(&[("SWEEP_WRAP_MODE", "mailbox")])).unwrap_err();
    assert!(err.contains("SWEEP_WRAP_MODE"), "{err}");

    assert!(SweepConfig::from_env_map(&env(&[
        ("SWEEP_USE_POOL", "1"),
        ("SWEEP_WRAP_MODE", "none"),
    ]))
    .is_err());
}

#[test]
fn test_wrap_mode_parsing() {
    assert_eq!("lock".parse::<WrapMode>().unwrap(), WrapMode::Lock);
    assert_eq!("QUEUE".parse::<WrapMode>().unwrap(), WrapMode::Queue);
    assert_eq!("none".parse::<WrapMode>().unwrap(), WrapMode::Direct);
    assert!("".parse::<WrapMode>().is_err());
}
