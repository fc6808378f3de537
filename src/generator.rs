//! License issuance: build a [`License`] from a request and sign it.
//!
//! Runs only on the issuing service, which is the sole holder of the
//! private key.

use std::collections::BTreeMap;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::crypto;
use crate::error::{LicenseError, Result};
use crate::models::{LICENSE_VERSION, License, Limits, Tier};
use crate::util;

pub const DEFAULT_ISSUER: &str = "licensegate";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub customer_id: String,
    pub customer_name: String,
    pub tier: Tier,
    /// Extra features on top of the tier defaults
    #[serde(default)]
    pub features: Vec<String>,
    /// Overrides the tier's limit preset when set
    #[serde(default)]
    pub limits: Option<Limits>,
    /// Negative values issue an already-expired license
    pub valid_days: i64,
    #[serde(default)]
    pub hardware_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl GenerateRequest {
    pub fn new(customer_id: impl Into<String>, customer_name: impl Into<String>, tier: Tier, valid_days: i64) -> Self {
        Self {
            customer_id: customer_id.into(),
            customer_name: customer_name.into(),
            tier,
            features: Vec::new(),
            limits: None,
            valid_days,
            hardware_id: None,
            metadata: BTreeMap::new(),
        }
    }
}

pub struct LicenseGenerator {
    signing_key: SigningKey,
    issuer: String,
}

impl LicenseGenerator {
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Build a generator from a base64 64-byte private key.
    pub fn from_base64(private_key: &str) -> Result<Self> {
        Ok(Self::new(crypto::load_private_key(private_key)?))
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a new license and return its key.
    pub fn generate(&self, req: &GenerateRequest) -> Result<String> {
        self.generate_license(req).map(|(_, key)| key)
    }

    /// Sign a new license, returning the signed record alongside its key.
    pub fn generate_license(&self, req: &GenerateRequest) -> Result<(License, String)> {
        if req.customer_id.trim().is_empty() {
            return Err(LicenseError::InvalidLicense("customer_id is required".into()));
        }

        let now = Utc::now();
        let expires_at = util::expiry_from_days(now, req.valid_days)
            .ok_or_else(|| LicenseError::InvalidLicense("valid_days out of range".into()))?;
        let mut license = License {
            id: generate_license_id(),
            customer_id: req.customer_id.clone(),
            customer_name: req.customer_name.clone(),
            tier: req.tier,
            features: resolve_features(req.tier, &req.features),
            limits: req.limits.unwrap_or_else(|| req.tier.limits()),
            issued_at: now,
            expires_at,
            hardware_id: req.hardware_id.clone().filter(|id| !id.is_empty()),
            issuer: self.issuer.clone(),
            version: LICENSE_VERSION,
            metadata: req.metadata.clone(),
            signature: String::new(),
        };

        let payload = crypto::canonical_bytes(&license)?;
        let signature = crypto::sign(&self.signing_key, &payload);
        let key = codec::encode(&payload, &signature);

        // The key's second segment is the base64url signature
        if let Some((_, sig_b64)) = key.rsplit_once('.') {
            license.signature = sig_b64.to_string();
        }

        tracing::info!(
            license_id = %license.id,
            customer_id = %license.customer_id,
            tier = %license.tier,
            expires_at = %license.expires_at,
            hardware_bound = license.hardware_id.is_some(),
            "Issued license"
        );

        Ok((license, key))
    }
}

/// Tier defaults followed by requested extras, without duplicates.
fn resolve_features(tier: Tier, extras: &[String]) -> Vec<String> {
    let mut features: Vec<String> = tier.features().into_iter().map(String::from).collect();
    for extra in extras {
        if !extra.is_empty() && !features.contains(extra) {
            features.push(extra.clone());
        }
    }
    features
}

/// Random ID shaped like a UUID: hex groups of 4, 2, 2, 2 and 6 bytes.
fn generate_license_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{}-{}-{}-{}-{}",
        hex::encode(&bytes[0..4]),
        hex::encode(&bytes[4..6]),
        hex::encode(&bytes[6..8]),
        hex::encode(&bytes[8..10]),
        hex::encode(&bytes[10..16])
    )
}
