//! Holds the current license and answers feature and limit queries.
//!
//! State machine:
//!
//! ```text
//! NoLicense ──load──> ValidOffline ──validate ok──> ValidOnline
//!                          │                            │
//!                          └──server unreachable──> GracePeriod ──grace elapsed──> Invalid
//!                                                       │
//!                                  any online check ──revoked──> Revoked (sticky until next load)
//! ```
//!
//! Readers (every feature/limit check) take a short read lock; writers swap
//! the license and a freshly computed [`LicenseStatus`] as a unit. No lock
//! is ever held across an `.await`.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;

use crate::client::{LicenseClient, ValidateResponse};
use crate::codec;
use crate::config::Config;
use crate::crypto;
use crate::error::{LicenseError, Result};
use crate::hardware;
use crate::models::{HardwareInfo, License, LicenseStatus, LimitKind, Limits, Tier, required_tier_for};
use crate::task::BackgroundTask;
use crate::telemetry::{TelemetryClient, UsageCollector, UsageEvent};
use crate::util::{self, Clock, SystemClock};

#[derive(Debug)]
struct ManagerState {
    license: Option<Arc<License>>,
    /// Key the license was loaded from, needed for activation
    raw_key: Option<String>,
    status: LicenseStatus,
    /// First failed online check since the last success
    offline_since: Option<DateTime<Utc>>,
    /// Revocation reason reported by the server
    revoked: Option<String>,
    instance_id: Option<String>,
}

impl Default for ManagerState {
    fn default() -> Self {
        Self {
            license: None,
            raw_key: None,
            status: LicenseStatus::unlicensed(),
            offline_since: None,
            revoked: None,
            instance_id: None,
        }
    }
}

impl ManagerState {
    /// License if one is loaded and currently usable.
    fn usable_license(&self) -> Option<&License> {
        self.license.as_deref().filter(|_| self.status.valid)
    }

    fn is_current(&self, license_id: &str) -> bool {
        self.license.as_ref().is_some_and(|l| l.id == license_id)
    }
}

pub struct Manager {
    public_key: VerifyingKey,
    config: Config,
    client: Option<LicenseClient>,
    telemetry: Option<(Arc<TelemetryClient>, Arc<UsageCollector>)>,
    clock: Arc<dyn Clock>,
    hardware_id: String,
    state: RwLock<ManagerState>,
}

impl Manager {
    /// Create a manager trusting `public_key`.
    ///
    /// A license client is created when the config enables online
    /// validation; telemetry is attached when it is enabled and a server
    /// URL is configured.
    pub fn new(public_key: VerifyingKey, config: Config) -> Result<Self> {
        let client = match (&config.server_url, config.offline_mode) {
            (Some(url), false) => Some(LicenseClient::new(url.clone())?),
            _ => None,
        };

        let telemetry = match (&config.server_url, config.offline_mode, config.telemetry_enabled) {
            (Some(url), false, true) => Some((
                Arc::new(TelemetryClient::with_capacity(url, config.telemetry_buffer)),
                Arc::new(UsageCollector::new()),
            )),
            _ => None,
        };

        Ok(Self {
            public_key,
            config,
            client,
            telemetry,
            clock: Arc::new(SystemClock),
            hardware_id: hardware::get_hardware_id_with_fallback(),
            state: RwLock::new(ManagerState::default()),
        })
    }

    /// Create a manager from config, reading the trusted key from
    /// `config.public_key`.
    pub fn from_config(config: Config) -> Result<Self> {
        let encoded = config
            .public_key
            .as_deref()
            .ok_or_else(|| LicenseError::InvalidKey("no public key configured".into()))?;
        let public_key = crypto::load_public_key(encoded)?;
        Self::new(public_key, config)
    }

    /// A manager that never contacts a license server.
    pub fn offline(public_key: VerifyingKey) -> Self {
        Self {
            public_key,
            config: Config {
                offline_mode: true,
                ..Config::default()
            },
            client: None,
            telemetry: None,
            clock: Arc::new(SystemClock),
            hardware_id: hardware::get_hardware_id_with_fallback(),
            state: RwLock::new(ManagerState::default()),
        }
    }

    /// Override the local fingerprint used for hardware binding.
    pub fn with_hardware_id(mut self, hardware_id: impl Into<String>) -> Self {
        self.hardware_id = hardware_id.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `client` for online validation, unless the manager is in
    /// forced-offline mode.
    pub fn with_client(mut self, client: LicenseClient) -> Self {
        if !self.config.offline_mode {
            self.client = Some(client);
        }
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryClient>, usage: Arc<UsageCollector>) -> Self {
        self.telemetry = Some((telemetry, usage));
        self
    }

    pub fn with_offline_grace(mut self, grace: Duration) -> Self {
        self.config.offline_grace = grace;
        self
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn online_client(&self) -> Option<&LicenseClient> {
        self.client.as_ref().filter(|_| !self.config.offline_mode)
    }

    // ============ Loading ============

    /// Load a key from the environment variable `var`.
    pub fn load_from_env(&self, var: &str) -> Result<LicenseStatus> {
        let key = std::env::var(var).map_err(|_| LicenseError::NoLicense)?;
        self.load_from_key(&key)
    }

    /// Load a key from a file.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<LicenseStatus> {
        let key = std::fs::read_to_string(path.as_ref())?;
        self.load_from_key(&key)
    }

    /// Try the configured file, then the configured env var. A manager
    /// with neither stays at Community capabilities.
    pub fn load_from_config(&self) -> Result<LicenseStatus> {
        if let Some(path) = &self.config.license_file {
            return self.load_from_file(path);
        }
        self.load_from_env(&self.config.license_env)
    }

    /// Verify `key` and make it the active license.
    ///
    /// Replaces any previous license, clearing revocation and the offline
    /// timer.
    pub fn load_from_key(&self, key: &str) -> Result<LicenseStatus> {
        let key = key.trim();
        if key.is_empty() {
            return Err(LicenseError::NoLicense);
        }

        let license = codec::parse_and_verify(key, &self.public_key).inspect_err(|e| {
            tracing::warn!(error = %e, "Rejected license key");
        })?;

        if let Some(bound) = license.bound_hardware_id()
            && bound != self.hardware_id
        {
            tracing::warn!(license_id = %license.id, "License is bound to a different machine");
            return Err(LicenseError::HardwareMismatch);
        }

        let now = self.clock.now();
        if license.is_expired_at(now) {
            tracing::warn!(
                license_id = %license.id,
                expires_at = %license.expires_at,
                "License has expired"
            );
            return Err(LicenseError::LicenseExpired {
                expired_at: license.expires_at,
            });
        }

        let status = LicenseStatus::verified(&license, now);

        tracing::info!(
            license_id = %license.id,
            customer_id = %license.customer_id,
            tier = %license.tier,
            days_remaining = status.days_remaining,
            "License loaded"
        );

        *self.write_state() = ManagerState {
            license: Some(Arc::new(license)),
            raw_key: Some(key.to_string()),
            status: status.clone(),
            ..ManagerState::default()
        };

        Ok(status)
    }

    // ============ Online validation ============

    /// Re-validate the license with the license server.
    ///
    /// Transport failures are absorbed into the offline grace period and
    /// return `Ok` while it lasts. Revocation is sticky until a new key is
    /// loaded.
    pub async fn validate_online(&self) -> Result<LicenseStatus> {
        let (license, revoked) = {
            let state = self.read_state();
            (state.license.clone(), state.revoked.clone())
        };

        let Some(license) = license else {
            return Err(LicenseError::NoLicense);
        };
        if let Some(reason) = revoked {
            return Err(LicenseError::Revoked(reason));
        }

        let Some(client) = self.online_client() else {
            return self.refresh_local(&license.id);
        };

        let result = client.validate(&license.id, &self.hardware_id).await;
        let now = self.clock.now();

        match result {
            Ok(response) => self.apply_validation(&license.id, response, now),
            Err(e) => self.enter_grace(&license.id, e, now),
        }
    }

    /// Re-evaluate local expiry without contacting the server.
    fn refresh_local(&self, license_id: &str) -> Result<LicenseStatus> {
        let now = self.clock.now();
        let mut state = self.write_state();
        if !state.is_current(license_id) {
            return Ok(state.status.clone());
        }
        let Some(license) = state.license.clone() else {
            return Err(LicenseError::NoLicense);
        };

        check_expiry(&mut state, &license, now)?;
        state.status.days_remaining = license.days_remaining_at(now);
        Ok(state.status.clone())
    }

    fn apply_validation(
        &self,
        license_id: &str,
        response: ValidateResponse,
        now: DateTime<Utc>,
    ) -> Result<LicenseStatus> {
        let mut state = self.write_state();
        if !state.is_current(license_id) {
            // A new key was loaded while the request was in flight
            return Ok(state.status.clone());
        }
        state.offline_since = None;

        if response.revoked {
            let reason = response
                .revoke_reason
                .or(response.message)
                .unwrap_or_else(|| "revoked by license server".to_string());
            tracing::error!(license_id = %license_id, reason = %reason, "License revoked");
            state.status = LicenseStatus {
                valid: false,
                last_validated: Some(now),
                online_validated: true,
                grace_period: false,
                message: format!("license revoked: {}", reason),
                ..state.status.clone()
            };
            state.revoked = Some(reason.clone());
            return Err(LicenseError::Revoked(reason));
        }

        if let Some((refreshed, key)) = response.license.and_then(|l| self.accept_refreshed(l)) {
            tracing::info!(
                license_id = %refreshed.id,
                expires_at = %refreshed.expires_at,
                "License refreshed by license server"
            );
            state.license = Some(Arc::new(refreshed));
            state.raw_key = Some(key);
        }
        let Some(license) = state.license.clone() else {
            return Err(LicenseError::NoLicense);
        };

        if !response.valid {
            let message = response
                .message
                .unwrap_or_else(|| "license rejected by license server".to_string());
            tracing::error!(license_id = %license.id, message = %message, "License rejected online");
            state.status = LicenseStatus {
                valid: false,
                last_validated: Some(now),
                online_validated: true,
                grace_period: false,
                message: message.clone(),
                ..state.status.clone()
            };
            return Err(LicenseError::InvalidLicense(message));
        }

        check_expiry(&mut state, &license, now)?;

        let days_remaining = license.days_remaining_at(now);
        state.status = LicenseStatus {
            valid: true,
            tier: license.tier,
            expires_at: Some(license.expires_at),
            days_remaining,
            last_validated: Some(now),
            online_validated: true,
            grace_period: false,
            message: format!("license validated online, {} days remaining", days_remaining),
        };

        tracing::info!(license_id = %license.id, days_remaining, "License validated online");
        Ok(state.status.clone())
    }

    fn enter_grace(&self, license_id: &str, error: LicenseError, now: DateTime<Utc>) -> Result<LicenseStatus> {
        let mut state = self.write_state();
        if !state.is_current(license_id) {
            return Ok(state.status.clone());
        }
        let Some(license) = state.license.clone() else {
            return Err(LicenseError::NoLicense);
        };

        check_expiry(&mut state, &license, now)?;

        let offline_since = *state.offline_since.get_or_insert(now);
        let grace = chrono::Duration::from_std(self.config.offline_grace)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let elapsed = now - offline_since;

        if elapsed >= grace {
            tracing::error!(
                license_id = %license.id,
                offline_since = %offline_since,
                error = %error,
                "Offline grace period expired"
            );
            state.status = LicenseStatus {
                valid: false,
                online_validated: false,
                grace_period: false,
                message: format!(
                    "license server unreachable since {}, offline grace period expired",
                    util::format_date(offline_since)
                ),
                ..state.status.clone()
            };
            return Err(LicenseError::GracePeriodExpired { offline_since });
        }

        let remaining = util::format_remaining(grace - elapsed);
        tracing::warn!(
            license_id = %license.id,
            error = %error,
            grace_remaining = %remaining,
            "Online validation failed, running in offline grace period"
        );
        state.status = LicenseStatus {
            valid: true,
            tier: license.tier,
            expires_at: Some(license.expires_at),
            days_remaining: license.days_remaining_at(now),
            last_validated: state.status.last_validated,
            online_validated: false,
            grace_period: true,
            message: format!(
                "license server unreachable, offline grace period ends in {}",
                remaining
            ),
        };
        Ok(state.status.clone())
    }

    /// A server-supplied license replaces the held one only if it carries a
    /// valid signature and still fits this machine. Returns the license
    /// with its rebuilt key.
    fn accept_refreshed(&self, license: License) -> Option<(License, String)> {
        if let Err(e) = codec::verify_record(&license, &self.public_key) {
            tracing::warn!(license_id = %license.id, error = %e, "Ignoring unverifiable license from server");
            return None;
        }
        if license.bound_hardware_id().is_some_and(|id| id != self.hardware_id) {
            tracing::warn!(license_id = %license.id, "Ignoring server license bound to another machine");
            return None;
        }
        match codec::encode_record(&license) {
            Ok(key) => Some((license, key)),
            Err(e) => {
                tracing::warn!(license_id = %license.id, error = %e, "Ignoring server license that cannot be re-encoded");
                None
            }
        }
    }

    // ============ Activation ============

    /// Register this installation with the license server.
    ///
    /// Returns the server's instance ID, or `None` when running offline.
    /// An unreachable server is not an error: the verified key keeps
    /// working locally. An explicit refusal is.
    pub async fn activate(&self) -> Result<Option<String>> {
        let (license_id, raw_key) = {
            let state = self.read_state();
            match (&state.license, &state.raw_key) {
                (Some(license), Some(key)) => (license.id.clone(), key.clone()),
                _ => return Err(LicenseError::NoLicense),
            }
        };

        let Some(client) = self.online_client() else {
            tracing::info!(license_id = %license_id, "Offline mode, skipping activation");
            return Ok(None);
        };

        let info = HardwareInfo::collect();
        let response = match client
            .activate(&raw_key, &self.hardware_id, &info.hostname, &info.platform)
            .await
        {
            Ok(response) => response,
            Err(e @ LicenseError::Network(_)) => {
                tracing::warn!(license_id = %license_id, error = %e, "License server unreachable, continuing in offline mode");
                return Ok(None);
            }
            Err(LicenseError::Server { status, message }) if status >= 500 => {
                tracing::warn!(license_id = %license_id, status, message = %message, "License server unavailable, continuing in offline mode");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "activation refused by license server".to_string());
            tracing::error!(license_id = %license_id, message = %message, "Activation refused");
            return Err(LicenseError::InvalidLicense(message));
        }

        let mut state = self.write_state();
        if !state.is_current(&license_id) {
            return Ok(Some(response.instance_id));
        }
        if let Some((refreshed, key)) = response.license.and_then(|l| self.accept_refreshed(l)) {
            state.license = Some(Arc::new(refreshed));
            state.raw_key = Some(key);
        }
        state.instance_id = Some(response.instance_id.clone());

        tracing::info!(license_id = %license_id, instance_id = %response.instance_id, "License activated");
        Ok(Some(response.instance_id))
    }

    /// Release this installation's hardware binding on the license server.
    pub async fn deactivate(&self) -> Result<()> {
        let (license_id, instance_id) = {
            let state = self.read_state();
            let Some(license) = &state.license else {
                return Err(LicenseError::NoLicense);
            };
            (license.id.clone(), state.instance_id.clone())
        };

        let (Some(client), Some(instance_id)) = (self.online_client(), instance_id) else {
            tracing::debug!(license_id = %license_id, "No activation to release");
            return Ok(());
        };

        client
            .deactivate(&license_id, &instance_id, &self.hardware_id)
            .await?;

        let mut state = self.write_state();
        if state.is_current(&license_id) {
            state.instance_id = None;
        }
        tracing::info!(license_id = %license_id, instance_id = %instance_id, "License deactivated");
        Ok(())
    }

    pub fn instance_id(&self) -> Option<String> {
        self.read_state().instance_id.clone()
    }

    // ============ Queries ============

    /// Whether `feature` is available. Without a usable license only
    /// Community features are.
    pub fn has_feature(&self, feature: &str) -> bool {
        let state = self.read_state();
        match state.usable_license() {
            Some(license) => license.grants_feature(feature),
            None => Tier::Community.includes_feature(feature),
        }
    }

    pub fn require_feature(&self, feature: &str) -> Result<()> {
        if self.has_feature(feature) {
            return Ok(());
        }
        Err(LicenseError::FeatureNotLicensed {
            feature: feature.to_string(),
            required_tier: required_tier_for(feature),
        })
    }

    /// Active limits: the license's when usable, else the Community preset.
    pub fn limits(&self) -> Limits {
        self.read_state()
            .usable_license()
            .map(|l| l.limits)
            .unwrap_or(Limits::COMMUNITY)
    }

    /// Check `value` against the active limit for `kind`. `0` is unlimited.
    pub fn check_limit(&self, kind: LimitKind, value: u64) -> Result<()> {
        let limits = self.limits();
        if limits.allows(kind, value) {
            return Ok(());
        }
        Err(LicenseError::LimitExceeded {
            kind,
            limit: limits.get(kind),
            value,
        })
    }

    pub fn tier(&self) -> Tier {
        self.read_state()
            .usable_license()
            .map(|l| l.tier)
            .unwrap_or(Tier::Community)
    }

    /// Whole days until the loaded license expires, as of now.
    pub fn days_remaining(&self) -> Option<i64> {
        let expires_at = self.read_state().license.as_ref().map(|l| l.expires_at)?;
        Some(util::days_until(expires_at, self.clock.now()))
    }

    pub fn get_status(&self) -> LicenseStatus {
        self.read_state().status.clone()
    }

    pub fn get_license(&self) -> Option<Arc<License>> {
        self.read_state().license.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.read_state().status.valid
    }

    pub fn hardware_id(&self) -> &str {
        &self.hardware_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn usage(&self) -> Option<Arc<UsageCollector>> {
        self.telemetry.as_ref().map(|(_, usage)| usage.clone())
    }

    // ============ Background validation ============

    /// Re-validate every `interval` until the returned task is stopped.
    ///
    /// Each tick also reports a usage heartbeat when telemetry is attached;
    /// buffered telemetry is flushed on shutdown.
    pub fn start_background_validation(self: &Arc<Self>, interval: Duration) -> BackgroundTask {
        let manager = Arc::clone(self);
        let shutdown_manager = Arc::clone(self);

        tracing::info!(interval_secs = interval.as_secs(), "Starting background license validation");

        BackgroundTask::spawn(
            "license-validation",
            interval,
            move || {
                let manager = Arc::clone(&manager);
                async move { manager.background_tick().await }
            },
            move || async move {
                if let Some((telemetry, _)) = &shutdown_manager.telemetry {
                    telemetry.flush().await;
                }
            },
        )
    }

    async fn background_tick(&self) {
        let license_id = self.read_state().license.as_ref().map(|l| l.id.clone());

        if license_id.is_some() {
            match self.validate_online().await {
                Ok(status) => tracing::debug!(
                    valid = status.valid,
                    grace_period = status.grace_period,
                    "Background validation complete"
                ),
                Err(e) => tracing::error!(error = %e, code = e.code(), "Background validation failed"),
            }
        }

        if let Some((telemetry, usage)) = &self.telemetry {
            telemetry.track(UsageEvent::heartbeat(
                license_id.as_deref(),
                &self.hardware_id,
                &usage.get_metrics(),
            ));
        }
    }
}

/// Invalidate the status when `license` has expired.
fn check_expiry(state: &mut ManagerState, license: &License, now: DateTime<Utc>) -> Result<()> {
    if !license.is_expired_at(now) {
        return Ok(());
    }
    tracing::error!(license_id = %license.id, expires_at = %license.expires_at, "License expired");
    state.status = LicenseStatus {
        valid: false,
        tier: license.tier,
        expires_at: Some(license.expires_at),
        days_remaining: license.days_remaining_at(now),
        last_validated: state.status.last_validated,
        online_validated: false,
        grace_period: false,
        message: format!("license expired on {}", util::format_date(license.expires_at)),
    };
    Err(LicenseError::LicenseExpired {
        expired_at: license.expires_at,
    })
}
