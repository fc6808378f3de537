//! Feature checks for code paths that only need yes/no answers.

use std::sync::Arc;

use crate::error::{LicenseError, Result};
use crate::manager::Manager;
use crate::models::{Tier, required_tier_for};

#[derive(Clone)]
pub struct FeatureGate {
    manager: Arc<Manager>,
}

impl FeatureGate {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    pub fn is_enabled(&self, feature: &str) -> bool {
        self.manager.has_feature(feature)
    }

    pub fn require(&self, feature: &str) -> Result<()> {
        self.manager.require_feature(feature)
    }

    /// Succeeds if at least one of `features` is licensed.
    ///
    /// The error names the first feature with the lowest required tier, the
    /// cheapest way to unlock the code path. An empty list always fails.
    pub fn require_any(&self, features: &[&str]) -> Result<()> {
        if features.iter().any(|f| self.manager.has_feature(f)) {
            return Ok(());
        }
        let cheapest = features
            .iter()
            .min_by_key(|f| required_tier_for(f).rank())
            .copied()
            .unwrap_or_default();
        Err(LicenseError::FeatureNotLicensed {
            feature: cheapest.to_string(),
            required_tier: required_tier_for(cheapest),
        })
    }

    /// Succeeds only if every one of `features` is licensed; reports the
    /// first missing one.
    pub fn require_all(&self, features: &[&str]) -> Result<()> {
        features.iter().try_for_each(|f| self.manager.require_feature(f))
    }

    pub fn get_tier(&self) -> Tier {
        self.manager.tier()
    }
}
