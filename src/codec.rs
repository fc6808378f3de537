//! License key encoding: `base64url(payload).base64url(signature)`.
//!
//! The payload is the canonical JSON of a [`License`] with its signature
//! omitted. Both halves use unpadded base64url, whose alphabet has no `.`,
//! so the key is split on its last dot.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::VerifyingKey;

use crate::crypto;
use crate::error::{LicenseError, Result};
use crate::models::License;

/// Join an encoded payload and signature into a license key.
pub fn encode(payload: &[u8], signature: &[u8]) -> String {
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(payload),
        URL_SAFE_NO_PAD.encode(signature)
    )
}

/// Split, decode and verify a license key, then deserialize its payload.
///
/// The signature is checked over the raw payload bytes before any JSON is
/// parsed, so structured data is never built from unverified input.
pub fn parse_and_verify(key: &str, public_key: &VerifyingKey) -> Result<License> {
    let key = key.trim();

    let (payload_b64, signature_b64) = key
        .rsplit_once('.')
        .filter(|(payload, signature)| !payload.is_empty() && !signature.is_empty())
        .ok_or_else(|| {
            LicenseError::InvalidLicense(
                "key must be two base64url segments separated by a dot".into(),
            )
        })?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| LicenseError::InvalidLicense(format!("invalid payload encoding: {}", e)))?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| LicenseError::InvalidLicense(format!("invalid signature encoding: {}", e)))?;

    crypto::verify(public_key, &payload, &signature)?;

    let mut license: License = serde_json::from_slice(&payload)
        .map_err(|e| LicenseError::InvalidLicense(format!("invalid payload JSON: {}", e)))?;
    license.signature = signature_b64.to_string();

    Ok(license)
}

/// Verify a license key against a trusted public key.
pub fn verify_license(key: &str, public_key: &VerifyingKey) -> Result<License> {
    parse_and_verify(key, public_key)
}

/// Verify a license record received as JSON against its embedded
/// base64url signature.
pub fn verify_record(license: &License, public_key: &VerifyingKey) -> Result<()> {
    let signature = URL_SAFE_NO_PAD
        .decode(&license.signature)
        .map_err(|_| LicenseError::InvalidSignature)?;
    let payload = crypto::canonical_bytes(license)?;
    crypto::verify(public_key, &payload, &signature)
}

/// Rebuild the license key for a signed record.
pub fn encode_record(license: &License) -> Result<String> {
    let signature = URL_SAFE_NO_PAD
        .decode(&license.signature)
        .map_err(|_| LicenseError::InvalidSignature)?;
    let payload = crypto::canonical_bytes(license)?;
    Ok(encode(&payload, &signature))
}
