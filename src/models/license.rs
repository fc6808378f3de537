use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tier::{Limits, Tier};
use crate::util;

/// Current payload format version.
pub const LICENSE_VERSION: u32 = 1;

/// The signed license payload.
///
/// Field order is the canonical serialization order; the signature is
/// computed over the JSON of every other field and is omitted from those
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub tier: Tier,
    /// Extra features granted on top of the tier defaults
    #[serde(default)]
    pub features: Vec<String>,
    pub limits: Limits,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Machine this license is bound to (None = any machine)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<String>,
    pub issuer: String,
    pub version: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// base64url signature; never part of the signed bytes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

impl License {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn days_remaining_at(&self, now: DateTime<Utc>) -> i64 {
        util::days_until(self.expires_at, now)
    }

    /// Hardware binding, treating an empty string as unbound.
    pub fn bound_hardware_id(&self) -> Option<&str> {
        self.hardware_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Whether `feature` is granted by the explicit list or the tier preset.
    pub fn grants_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature) || self.tier.includes_feature(feature)
    }
}

/// Derived license state. Recomputed and swapped whole, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseStatus {
    pub valid: bool,
    pub tier: Tier,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: i64,
    pub last_validated: Option<DateTime<Utc>>,
    pub online_validated: bool,
    pub grace_period: bool,
    pub message: String,
}

impl LicenseStatus {
    /// Status with no license loaded: Community capabilities only.
    pub fn unlicensed() -> Self {
        Self {
            valid: false,
            tier: Tier::Community,
            expires_at: None,
            days_remaining: 0,
            last_validated: None,
            online_validated: false,
            grace_period: false,
            message: "no license loaded, running with community features".to_string(),
        }
    }

    /// Status of a freshly verified license.
    pub fn verified(license: &License, now: DateTime<Utc>) -> Self {
        let days_remaining = license.days_remaining_at(now);
        Self {
            valid: true,
            tier: license.tier,
            expires_at: Some(license.expires_at),
            days_remaining,
            last_validated: Some(now),
            online_validated: false,
            grace_period: false,
            message: format!("{} license valid, {} days remaining", license.tier, days_remaining),
        }
    }
}
