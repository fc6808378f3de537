//! Runtime limit enforcement.
//!
//! The data path reports activity through lock-free counters; a periodic
//! tick compares them against the active limits and notifies the host.
//! Nothing is killed automatically: reacting to a violation is the host's
//! decision.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{LicenseError, Result};
use crate::manager::Manager;
use crate::models::{LimitKind, connector_feature, required_tier_for};
use crate::task::BackgroundTask;

/// Days-remaining values that trigger an expiry warning.
pub const WARNING_DAYS: [i64; 5] = [30, 14, 7, 3, 1];

const NO_WARNING: i64 = i64::MIN;

/// `(kind, current, max)`
pub type LimitCallback = Arc<dyn Fn(LimitKind, u64, u64) + Send + Sync>;
/// `(days_remaining)`
pub type ExpiryCallback = Arc<dyn Fn(i64) + Send + Sync>;

/// A limit found exceeded during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitViolation {
    pub kind: LimitKind,
    pub current: u64,
    pub limit: u64,
}

pub struct Enforcer {
    manager: Arc<Manager>,
    interval: Duration,
    events: AtomicU64,
    sources: AtomicU64,
    tables: AtomicU64,
    throughput: AtomicU64,
    last_tick: Mutex<Instant>,
    /// Days-remaining value of the last expiry warning
    last_warning: AtomicI64,
    on_limit_exceeded: Option<LimitCallback>,
    on_license_expiry: Option<ExpiryCallback>,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("interval", &self.interval)
            .field("sources", &self.sources)
            .field("tables", &self.tables)
            .field("throughput", &self.throughput)
            .finish_non_exhaustive()
    }
}

impl Enforcer {
    /// Enforcer ticking at the manager's configured interval.
    pub fn new(manager: Arc<Manager>) -> Self {
        let interval = manager.config().enforcer_interval;
        Self {
            manager,
            interval,
            events: AtomicU64::new(0),
            sources: AtomicU64::new(0),
            tables: AtomicU64::new(0),
            throughput: AtomicU64::new(0),
            last_tick: Mutex::new(Instant::now()),
            last_warning: AtomicI64::new(NO_WARNING),
            on_limit_exceeded: None,
            on_license_expiry: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn on_limit_exceeded<F>(mut self, callback: F) -> Self
    where
        F: Fn(LimitKind, u64, u64) + Send + Sync + 'static,
    {
        self.on_limit_exceeded = Some(Arc::new(callback));
        self
    }

    pub fn on_license_expiry<F>(mut self, callback: F) -> Self
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.on_license_expiry = Some(Arc::new(callback));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    // ============ Hot path ============

    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events(&self, count: u64) {
        self.events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_sources(&self, count: u64) {
        self.sources.store(count, Ordering::Relaxed);
    }

    pub fn set_tables(&self, count: u64) {
        self.tables.store(count, Ordering::Relaxed);
    }

    /// Events per second measured at the last tick.
    pub fn current_throughput(&self) -> u64 {
        self.throughput.load(Ordering::Relaxed)
    }

    // ============ Admission ============

    /// Whether one more source of `source_type` may be added.
    pub fn check_source_allowed(&self, source_type: &str) -> Result<()> {
        if let Some(feature) = connector_feature(source_type)
            && !self.manager.has_feature(feature)
        {
            return Err(LicenseError::FeatureNotLicensed {
                feature: feature.to_string(),
                required_tier: required_tier_for(feature),
            });
        }
        let next = self.sources.load(Ordering::Relaxed) + 1;
        self.manager.check_limit(LimitKind::Sources, next)
    }

    /// Whether one more table may be added.
    pub fn check_table_allowed(&self) -> Result<()> {
        let next = self.tables.load(Ordering::Relaxed) + 1;
        self.manager.check_limit(LimitKind::Tables, next)
    }

    // ============ Periodic check ============

    /// Run one enforcement pass now.
    ///
    /// Measures throughput since the previous tick, resets the event
    /// counter and reports every exceeded limit. Windows shorter than a
    /// second are measured as one second.
    pub fn tick(&self) -> Vec<LimitViolation> {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_tick.lock().unwrap_or_else(PoisonError::into_inner);
            let elapsed = now.duration_since(*last);
            *last = now;
            elapsed
        };

        let events = self.events.swap(0, Ordering::Relaxed);
        let throughput = (events as f64 / elapsed.as_secs_f64().max(1.0)).round() as u64;
        self.throughput.store(throughput, Ordering::Relaxed);

        let limits = self.manager.limits();
        let observed = [
            (LimitKind::Sources, self.sources.load(Ordering::Relaxed)),
            (LimitKind::Tables, self.tables.load(Ordering::Relaxed)),
            (LimitKind::Throughput, throughput),
        ];

        let violations: Vec<LimitViolation> = observed
            .into_iter()
            .filter(|&(kind, current)| !limits.allows(kind, current))
            .map(|(kind, current)| LimitViolation {
                kind,
                current,
                limit: limits.get(kind),
            })
            .collect();

        for v in &violations {
            tracing::warn!(
                kind = %v.kind,
                current = v.current,
                limit = v.limit,
                "License limit exceeded"
            );
            if let Some(callback) = &self.on_limit_exceeded {
                callback(v.kind, v.current, v.limit);
            }
        }

        self.check_expiry();
        violations
    }

    /// Fire the expiry callback once per warning threshold reached.
    fn check_expiry(&self) {
        if !self.manager.is_valid() {
            return;
        }
        let Some(days) = self.manager.days_remaining() else {
            return;
        };
        if !WARNING_DAYS.contains(&days) {
            return;
        }
        if self.last_warning.swap(days, Ordering::Relaxed) == days {
            return;
        }

        tracing::warn!(days_remaining = days, tier = %self.manager.tier(), "License expires soon");
        if let Some(callback) = &self.on_license_expiry {
            callback(days);
        }
    }

    /// Tick every [`interval`](Self::interval) until the task is stopped.
    pub fn start(self: &Arc<Self>) -> BackgroundTask {
        let enforcer = Arc::clone(self);
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting license enforcer");

        BackgroundTask::spawn(
            "license-enforcer",
            self.interval,
            move || {
                let enforcer = Arc::clone(&enforcer);
                async move {
                    enforcer.tick();
                }
            },
            || async {},
        )
    }
}
