use std::env;
use std::time::Duration;

pub const DEFAULT_LICENSE_ENV: &str = "LICENSE_KEY";
pub const DEFAULT_OFFLINE_GRACE_DAYS: u64 = 7;
pub const DEFAULT_VALIDATION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_ENFORCER_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TELEMETRY_BUFFER: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the env var holding the license key
    pub license_env: String,
    pub license_file: Option<String>,
    /// Base64 Ed25519 public key trusted for verification
    pub public_key: Option<String>,
    /// License server base URL (None = no online validation)
    pub server_url: Option<String>,
    /// Never contact the license server
    pub offline_mode: bool,
    /// How long a license stays usable without a successful online check
    pub offline_grace: Duration,
    pub validation_interval: Duration,
    pub enforcer_interval: Duration,
    pub telemetry_enabled: bool,
    pub telemetry_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            license_env: DEFAULT_LICENSE_ENV.to_string(),
            license_file: None,
            public_key: None,
            server_url: None,
            offline_mode: false,
            offline_grace: days(DEFAULT_OFFLINE_GRACE_DAYS),
            validation_interval: DEFAULT_VALIDATION_INTERVAL,
            enforcer_interval: DEFAULT_ENFORCER_INTERVAL,
            telemetry_enabled: true,
            telemetry_buffer: DEFAULT_TELEMETRY_BUFFER,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let offline_mode = env::var("LICENSE_OFFLINE_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let offline_grace = env::var("LICENSE_OFFLINE_GRACE_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(days)
            .unwrap_or(defaults.offline_grace);

        let validation_interval = env::var("LICENSE_VALIDATION_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.validation_interval);

        let enforcer_interval = env::var("LICENSE_ENFORCER_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.enforcer_interval);

        let telemetry_enabled = env::var("LICENSE_TELEMETRY_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let telemetry_buffer = env::var("LICENSE_TELEMETRY_BUFFER")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.telemetry_buffer);

        Self {
            license_env: env::var("LICENSE_KEY_ENV")
                .unwrap_or_else(|_| DEFAULT_LICENSE_ENV.to_string()),
            license_file: env::var("LICENSE_FILE").ok().filter(|v| !v.is_empty()),
            public_key: env::var("LICENSE_PUBLIC_KEY").ok().filter(|v| !v.is_empty()),
            server_url: env::var("LICENSE_SERVER_URL")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            offline_mode,
            offline_grace,
            validation_interval,
            enforcer_interval,
            telemetry_enabled,
            telemetry_buffer,
        }
    }

    /// Whether online validation can run at all.
    pub fn online_enabled(&self) -> bool {
        !self.offline_mode && self.server_url.is_some()
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}
