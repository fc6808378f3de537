use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use licensegate::enforcer::{Enforcer, LimitViolation};

use crate::common::*;

fn licensed(tier: Tier, days: i64) -> Arc<Manager> {
    let manager = offline_manager();
    manager.load_from_key(&make_key(tier, days)).unwrap();
    Arc::new(manager)
}

// ============ Tick ============

#[tokio::test(start_paused = true)]
async fn test_throughput_measured_per_tick() {
    let enforcer = Enforcer::new(licensed(Tier::Community, 30));

    enforcer.record_events(5000);
    tokio::time::advance(Duration::from_secs(2)).await;
    let violations = enforcer.tick();

    assert_eq!(enforcer.current_throughput(), 2500);
    assert_eq!(
        violations,
        vec![LimitViolation {
            kind: LimitKind::Throughput,
            current: 2500,
            limit: 1000,
        }]
    );

    // Counter resets every tick
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(enforcer.tick().is_empty());
    assert_eq!(enforcer.current_throughput(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_every_violated_dimension_reported() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let enforcer = Enforcer::new(licensed(Tier::Community, 30))
        .on_limit_exceeded(move |kind, current, max| sink.lock().unwrap().push((kind, current, max)));

    enforcer.set_sources(2);
    enforcer.set_tables(11);
    for _ in 0..1500 {
        enforcer.record_event();
    }
    tokio::time::advance(Duration::from_secs(1)).await;
    enforcer.tick();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (LimitKind::Sources, 2, 1),
            (LimitKind::Tables, 11, 10),
            (LimitKind::Throughput, 1500, 1000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_enterprise_never_violates() {
    let enforcer = Enforcer::new(licensed(Tier::Enterprise, 30));
    enforcer.set_sources(500);
    enforcer.set_tables(100_000);
    enforcer.record_events(10_000_000);
    tokio::time::advance(Duration::from_secs(1)).await;

    assert!(enforcer.tick().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_expiry_warning_fires_once_per_threshold() {
    let warnings = Arc::new(Mutex::new(Vec::new()));
    let sink = warnings.clone();
    // 8 days from now floors to 7 days remaining
    let enforcer = Enforcer::new(licensed(Tier::Pro, 8)).on_license_expiry(move |days| sink.lock().unwrap().push(days));

    enforcer.tick();
    enforcer.tick();
    assert_eq!(*warnings.lock().unwrap(), vec![7]);
}

#[tokio::test(start_paused = true)]
async fn test_no_expiry_warning_outside_thresholds() {
    let fired = Arc::new(AtomicU64::new(0));
    let counter = fired.clone();
    let enforcer = Enforcer::new(licensed(Tier::Pro, 60)).on_license_expiry(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    enforcer.tick();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

// ============ Admission ============

#[test]
fn test_source_admission() {
    let enforcer = Enforcer::new(licensed(Tier::Community, 30));

    assert!(enforcer.check_source_allowed("postgresql").is_ok());
    match enforcer.check_source_allowed("mongodb").unwrap_err() {
        LicenseError::FeatureNotLicensed { feature, required_tier } => {
            assert_eq!(feature, "mongodb");
            assert_eq!(required_tier, Tier::Pro);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    enforcer.set_sources(1);
    assert!(matches!(
        enforcer.check_source_allowed("mysql"),
        Err(LicenseError::LimitExceeded { kind: LimitKind::Sources, limit: 1, value: 2 })
    ));
}

#[test]
fn test_unknown_source_type_only_counts_against_limit() {
    let enforcer = Enforcer::new(licensed(Tier::Community, 30));
    assert!(enforcer.check_source_allowed("http_poller").is_ok());
}

#[test]
fn test_table_admission() {
    let enforcer = Enforcer::new(licensed(Tier::Pro, 30));
    enforcer.set_tables(99);
    assert!(enforcer.check_table_allowed().is_ok());
    enforcer.set_tables(100);
    assert!(enforcer.check_table_allowed().is_err());
}

// ============ Background task ============

#[tokio::test(start_paused = true)]
async fn test_background_enforcer_ticks_at_interval() {
    let hits = Arc::new(AtomicU64::new(0));
    let counter = hits.clone();
    let enforcer = Arc::new(
        Enforcer::new(licensed(Tier::Community, 30))
            .with_interval(Duration::from_secs(60))
            .on_limit_exceeded(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
    );
    assert_eq!(enforcer.interval(), Duration::from_secs(60));
    enforcer.set_sources(3);

    let task = enforcer.start();
    tokio::time::sleep(Duration::from_secs(150)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    task.stop().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
