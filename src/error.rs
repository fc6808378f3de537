//! Error types for license loading, verification and enforcement.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{LimitKind, Tier};

#[derive(Debug, Error)]
pub enum LicenseError {
    /// No license key was supplied.
    #[error("no license key provided")]
    NoLicense,

    /// Malformed key encoding or payload JSON.
    #[error("invalid license: {0}")]
    InvalidLicense(String),

    /// The signature does not verify against the trusted public key.
    #[error("license signature verification failed")]
    InvalidSignature,

    #[error("license expired at {expired_at}")]
    LicenseExpired { expired_at: DateTime<Utc> },

    /// The license is bound to a different machine.
    #[error("license is bound to a different machine")]
    HardwareMismatch,

    #[error("feature '{feature}' requires the {required_tier} tier")]
    FeatureNotLicensed { feature: String, required_tier: Tier },

    #[error("{kind} limit exceeded: {value} > {limit}")]
    LimitExceeded {
        kind: LimitKind,
        limit: u64,
        value: u64,
    },

    /// Offline tolerance window elapsed without a successful online check.
    #[error("offline grace period expired (offline since {offline_since})")]
    GracePeriodExpired { offline_since: DateTime<Utc> },

    /// The license server reported the license as revoked.
    #[error("license revoked: {0}")]
    Revoked(String),

    /// Malformed public or private key material.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("license server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoLicense => "NO_LICENSE",
            Self::InvalidLicense(_) => "INVALID_LICENSE",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::LicenseExpired { .. } => "LICENSE_EXPIRED",
            Self::HardwareMismatch => "HARDWARE_MISMATCH",
            Self::FeatureNotLicensed { .. } => "FEATURE_NOT_LICENSED",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::GracePeriodExpired { .. } => "GRACE_PERIOD_EXPIRED",
            Self::Revoked(_) => "LICENSE_REVOKED",
            Self::InvalidKey(_) => "INVALID_KEY",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Server { .. } => "SERVER_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether this error came from talking to the license server rather
    /// than from the license itself. These are recovered into the grace
    /// period by the manager.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }
}

pub type Result<T> = std::result::Result<T, LicenseError>;
