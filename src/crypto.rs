//! Ed25519 key handling, canonical serialization and sign/verify.
//!
//! Public keys are 32 bytes. Private keys are carried as the 64-byte
//! keypair encoding (32-byte seed followed by the 32-byte public key).
//! Both are exchanged as standard (padded) base64. Only the issuing side
//! ever holds a private key.

use base64::{Engine, engine::general_purpose::STANDARD};
use ed25519_dalek::{
    KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, Signature, Signer as _, SigningKey,
    Verifier as _, VerifyingKey,
};
use rand::rngs::OsRng;

use crate::error::{LicenseError, Result};
use crate::models::License;

pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generates a new random Ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn public_key_base64(&self) -> String {
        encode_public_key(&self.verifying_key)
    }

    pub fn private_key_base64(&self) -> String {
        encode_private_key(&self.signing_key)
    }
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    STANDARD.encode(key.to_bytes())
}

pub fn encode_private_key(key: &SigningKey) -> String {
    STANDARD.encode(key.to_keypair_bytes())
}

/// Decode a base64 public key, rejecting anything that is not 32 bytes.
pub fn load_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| LicenseError::InvalidKey(format!("public key is not valid base64: {}", e)))?;

    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        LicenseError::InvalidKey(format!(
            "public key must be {} bytes, got {}",
            PUBLIC_KEY_LENGTH,
            bytes.len()
        ))
    })?;

    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| LicenseError::InvalidKey("public key is not a valid curve point".into()))
}

/// Decode a base64 private key, rejecting anything that is not 64 bytes or
/// whose public half does not belong to its seed.
pub fn load_private_key(encoded: &str) -> Result<SigningKey> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| LicenseError::InvalidKey(format!("private key is not valid base64: {}", e)))?;

    let bytes: [u8; KEYPAIR_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        LicenseError::InvalidKey(format!(
            "private key must be {} bytes, got {}",
            KEYPAIR_LENGTH,
            bytes.len()
        ))
    })?;

    SigningKey::from_keypair_bytes(&bytes)
        .map_err(|_| LicenseError::InvalidKey("private key halves do not match".into()))
}

/// Bytes that get signed for `license`: its JSON with the signature cleared.
pub fn canonical_bytes(license: &License) -> Result<Vec<u8>> {
    if license.signature.is_empty() {
        return Ok(serde_json::to_vec(license)?);
    }
    let unsigned = License {
        signature: String::new(),
        ..license.clone()
    };
    Ok(serde_json::to_vec(&unsigned)?)
}

pub fn sign(key: &SigningKey, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
    key.sign(message).to_bytes()
}

/// Verify `signature` over `message`. A signature of the wrong length is
/// reported the same as one that does not verify.
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<()> {
    let signature =
        Signature::from_slice(signature).map_err(|_| LicenseError::InvalidSignature)?;
    key.verify(message, &signature)
        .map_err(|_| LicenseError::InvalidSignature)
}
