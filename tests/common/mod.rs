//! Shared test helpers: fixed keys, license builders and a manual clock.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};

pub use licensegate::client::LicenseClient;
pub use licensegate::config::Config;
pub use licensegate::error::LicenseError;
pub use licensegate::generator::{GenerateRequest, LicenseGenerator};
pub use licensegate::manager::Manager;
pub use licensegate::models::{License, LimitKind, Limits, Tier};
pub use licensegate::util::Clock;

pub const TEST_HARDWARE_ID: &str = "0123456789abcdef0123456789abcdef";

/// Deterministic Ed25519 signing key.
pub fn test_signing_key() -> SigningKey {
    let seed: [u8; 32] = [
        7, 3, 9, 1, 5, 2, 8, 4, 6, 0, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67,
        71, 73, 79, 83, 89, 97, 101,
    ];
    SigningKey::from_bytes(&seed)
}

pub fn test_public_key() -> VerifyingKey {
    test_signing_key().verifying_key()
}

pub fn test_generator() -> LicenseGenerator {
    LicenseGenerator::new(test_signing_key())
}

/// Sign a license for `tier` valid for `days`.
pub fn make_key(tier: Tier, days: i64) -> String {
    test_generator()
        .generate(&GenerateRequest::new("cust-1", "Acme Corp", tier, days))
        .expect("generate license")
}

/// Sign a license from a fully custom request.
pub fn make_key_with(req: GenerateRequest) -> (License, String) {
    test_generator().generate_license(&req).expect("generate license")
}

/// Offline manager with a fixed hardware ID.
pub fn offline_manager() -> Manager {
    Manager::offline(test_public_key()).with_hardware_id(TEST_HARDWARE_ID)
}

/// Manager talking to `server_url` with a manual clock.
pub fn online_manager(server_url: &str, clock: Arc<ManualClock>) -> Manager {
    let config = Config {
        server_url: Some(server_url.to_string()),
        telemetry_enabled: false,
        ..Config::default()
    };
    Manager::new(test_public_key(), config)
        .expect("create manager")
        .with_hardware_id(TEST_HARDWARE_ID)
        .with_clock(clock)
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
