//! Tiered, Ed25519-signed licensing.
//!
//! Issuers sign licenses with [`LicenseGenerator`]. Deployments verify them
//! offline through a [`Manager`], which periodically re-validates online,
//! and gate behaviour with [`FeatureGate`] and [`Enforcer`].

pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod enforcer;
pub mod error;
pub mod gate;
pub mod generator;
pub mod hardware;
pub mod manager;
pub mod models;
pub mod task;
pub mod telemetry;
pub mod util;

pub use client::LicenseClient;
pub use config::Config;
pub use crypto::KeyPair;
pub use enforcer::{Enforcer, LimitViolation};
pub use error::{LicenseError, Result};
pub use gate::FeatureGate;
pub use generator::{GenerateRequest, LicenseGenerator};
pub use manager::Manager;
pub use models::{License, LicenseStatus, LimitKind, Limits, Tier};
pub use task::BackgroundTask;
pub use telemetry::{TelemetryClient, UsageCollector, UsageEvent, UsageMetrics};
