//! Tests for admission control

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sweep_scheduler::core::{
    Admission, FixedProbe, InterruptHandle, ResourceCaps, ResourceMonitor, ResourceSnapshot,
    NO_LIMIT,
};

fn cpu_cap(cap: f64) -> ResourceCaps {
    ResourceCaps {
        cpu: cap,
        memory: NO_LIMIT,
        swap: NO_LIMIT,
    }
}

fn fast(monitor: ResourceMonitor) -> ResourceMonitor {
    monitor
        .with_poll_interval(Duration::from_millis(5))
        .with_grace_period(Duration::from_millis(60))
}

#[test]
fn test_cap_of_one_hundred_never_blocks() {
    let probe = Arc::new(FixedProbe::new(ResourceSnapshot::new(100.0, 100.0, 100.0)));
    let monitor = fast(ResourceMonitor::new(ResourceCaps::unlimited(), probe));
    assert_eq!(
        monitor.wait_for_admission(8, &InterruptHandle::new()),
        Ok(Admission::Granted)
    );
}

#[test]
fn test_admission_granted_once_load_drops() {
    let probe = Arc::new(FixedProbe::new(ResourceSnapshot::new(95.0, 10.0, 0.0)));
    let monitor = ResourceMonitor::new(cpu_cap(50.0), probe.clone())
        .with_poll_interval(Duration::from_millis(5))
        .with_grace_period(Duration::from_secs(5));

    let releaser = {
        let probe = Arc::clone(&probe);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            probe.set(ResourceSnapshot::new(20.0, 10.0, 0.0));
        })
    };

    let started = Instant::now();
    let admission = monitor.wait_for_admission(2, &InterruptHandle::new());
    releaser.join().unwrap();
    assert_eq!(admission, Ok(Admission::Granted));
    assert!(started.elapsed() >= Duration::from_millis(25));
}

#[test]
fn test_liveness_forces_admission_when_idle() {
    let probe = Arc::new(FixedProbe::new(ResourceSnapshot::new(99.0, 10.0, 0.0)));
    let monitor = fast(ResourceMonitor::new(cpu_cap(10.0), probe));
    assert_eq!(
        monitor.wait_for_admission(0, &InterruptHandle::new()),
        Ok(Admission::Forced)
    );
}

#[test]
fn test_timeout_with_runs_in_flight() {
    let probe = Arc::new(FixedProbe::new(ResourceSnapshot::new(99.0, 10.0, 0.0)));
    let monitor = fast(ResourceMonitor::new(cpu_cap(10.0), probe));
    let timeout = monitor
        .wait_for_admission(3, &InterruptHandle::new())
        .unwrap_err();
    assert_eq!(timeout.in_flight, 3);
    assert!(timeout.waited >= Duration::from_millis(60));
}

#[test]
fn test_probe_failure_admits() {
    let probe = Arc::new(FixedProbe::new(ResourceSnapshot::new(99.0, 99.0, 99.0)));
    probe.set_failing(true);
    let monitor = fast(ResourceMonitor::new(cpu_cap(10.0), probe));
    assert_eq!(
        monitor.wait_for_admission(4, &InterruptHandle::new()),
        Ok(Admission::Granted)
    );
}

#[test]
fn test_interrupt_wins_over_waiting() {
    let probe = Arc::new(FixedProbe::new(ResourceSnapshot::new(99.0, 10.0, 0.0)));
    let monitor = ResourceMonitor::new(cpu_cap(10.0), probe)
        .with_poll_interval(Duration::from_millis(5))
        .with_grace_period(Duration::from_secs(10));
    let interrupt = InterruptHandle::new();

    let trigger = {
        let interrupt = interrupt.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            interrupt.interrupt();
        })
    };

    assert_eq!(
        monitor.wait_for_admission(1, &interrupt),
        Ok(Admission::Interrupted)
    );
    trigger.join().unwrap();
}

#[test]
fn test_exceeded_names_each_cap() {
    let caps = ResourceCaps {
        cpu: 50.0,
        memory: 50.0,
        swap: 50.0,
    };
    let exceeded = caps.exceeded(&ResourceSnapshot::new(60.0, 40.0, 70.0));
    assert_eq!(exceeded, vec!["cpu", "swap"]);
}
