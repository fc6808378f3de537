//! Best-effort usage reporting.
//!
//! [`UsageCollector`] accumulates counters from the data path.
//! [`TelemetryClient`] buffers discrete events and ships them in batches.
//! Telemetry never surfaces an error to the host: every delivery failure
//! is logged at debug level and dropped.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TELEMETRY_BUFFER;

const TELEMETRY_PATH: &str = "/api/v1/telemetry";
const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Snapshot of usage since process start or the last reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub since: DateTime<Utc>,
    pub events_processed: u64,
    pub bytes_processed: u64,
    pub errors: u64,
    pub max_latency_ms: f64,
    pub avg_latency_ms: f64,
    pub features_used: Vec<String>,
    pub restarts: u64,
}

#[derive(Debug)]
struct UsageCounters {
    since: DateTime<Utc>,
    events: u64,
    bytes: u64,
    errors: u64,
    latency_total: Duration,
    latency_samples: u64,
    latency_max: Duration,
    features: BTreeSet<String>,
    restarts: u64,
}

impl UsageCounters {
    fn new(since: DateTime<Utc>) -> Self {
        Self {
            since,
            events: 0,
            bytes: 0,
            errors: 0,
            latency_total: Duration::ZERO,
            latency_samples: 0,
            latency_max: Duration::ZERO,
            features: BTreeSet::new(),
            restarts: 0,
        }
    }
}

#[derive(Debug)]
pub struct UsageCollector {
    counters: Mutex<UsageCounters>,
}

impl Default for UsageCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageCollector {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(UsageCounters::new(Utc::now())),
        }
    }

    pub fn record_events(&self, count: u64, bytes: u64) {
        let mut c = lock(&self.counters);
        c.events += count;
        c.bytes += bytes;
    }

    pub fn record_error(&self) {
        lock(&self.counters).errors += 1;
    }

    pub fn record_latency(&self, latency: Duration) {
        let mut c = lock(&self.counters);
        c.latency_total += latency;
        c.latency_samples += 1;
        c.latency_max = c.latency_max.max(latency);
    }

    pub fn record_feature_usage(&self, feature: &str) {
        let mut c = lock(&self.counters);
        if !c.features.contains(feature) {
            c.features.insert(feature.to_string());
        }
    }

    pub fn record_restart(&self) {
        lock(&self.counters).restarts += 1;
    }

    /// Current counters. Does not reset.
    pub fn get_metrics(&self) -> UsageMetrics {
        let c = lock(&self.counters);
        let avg_ms = if c.latency_samples == 0 {
            0.0
        } else {
            c.latency_total.as_secs_f64() * 1000.0 / c.latency_samples as f64
        };
        UsageMetrics {
            since: c.since,
            events_processed: c.events,
            bytes_processed: c.bytes,
            errors: c.errors,
            max_latency_ms: c.latency_max.as_secs_f64() * 1000.0,
            avg_latency_ms: avg_ms,
            features_used: c.features.iter().cloned().collect(),
            restarts: c.restarts,
        }
    }

    pub fn reset(&self) {
        *lock(&self.counters) = UsageCounters::new(Utc::now());
    }
}

/// A discrete telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
    pub hardware_id: String,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl UsageEvent {
    pub fn new(event_type: impl Into<String>, hardware_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            license_id: None,
            hardware_id: hardware_id.into(),
            timestamp: Utc::now().timestamp(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_license(mut self, license_id: impl Into<String>) -> Self {
        self.license_id = Some(license_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Periodic usage report.
    pub fn heartbeat(license_id: Option<&str>, hardware_id: &str, metrics: &UsageMetrics) -> Self {
        let event = Self::new("heartbeat", hardware_id)
            .with_data(serde_json::to_value(metrics).unwrap_or_default());
        match license_id {
            Some(id) => event.with_license(id),
            None => event,
        }
    }
}

#[derive(Debug)]
pub struct TelemetryClient {
    http_client: Client,
    /// None = telemetry disabled
    endpoint: Option<String>,
    capacity: usize,
    buffer: Mutex<Vec<UsageEvent>>,
}

impl TelemetryClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_capacity(base_url, DEFAULT_TELEMETRY_BUFFER)
    }

    pub fn with_capacity(base_url: &str, capacity: usize) -> Self {
        let http_client = Client::builder()
            .timeout(TELEMETRY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            endpoint: Some(format!("{}{}", base_url.trim_end_matches('/'), TELEMETRY_PATH)),
            capacity: capacity.max(1),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// A client that drops every event.
    pub fn disabled() -> Self {
        Self {
            http_client: Client::new(),
            endpoint: None,
            capacity: DEFAULT_TELEMETRY_BUFFER,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn pending(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// Buffer an event. Reaching capacity ships the batch on a detached task.
    pub fn track(&self, event: UsageEvent) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        let batch = {
            let mut buffer = lock(&self.buffer);
            buffer.push(event);
            if buffer.len() < self.capacity {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = self.http_client.clone();
                let endpoint = endpoint.clone();
                handle.spawn(async move {
                    send_batch(&client, &endpoint, batch).await;
                });
            }
            Err(_) => {
                tracing::debug!(dropped = batch.len(), "No async runtime, dropping telemetry batch");
            }
        }
    }

    /// Ship everything buffered now.
    pub async fn flush(&self) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        let batch = std::mem::take(&mut *lock(&self.buffer));
        if batch.is_empty() {
            return;
        }
        send_batch(&self.http_client, endpoint, batch).await;
    }
}

async fn send_batch(client: &Client, endpoint: &str, batch: Vec<UsageEvent>) {
    let count = batch.len();
    match client.post(endpoint).json(&batch).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::debug!(events = count, "Telemetry batch delivered");
        }
        Ok(response) => {
            tracing::debug!(status = %response.status(), events = count, "Telemetry endpoint rejected batch");
        }
        Err(e) => {
            tracing::debug!(error = %e, events = count, "Telemetry delivery failed");
        }
    }
}
