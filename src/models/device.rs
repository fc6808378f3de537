use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Where a hardware ID was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FingerprintSource {
    Kubernetes,
    Machine,
    Hostname,
    /// No binding available
    None,
}

/// Raw identity components of the executing machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    /// OS-provided machine UUID; empty when unavailable
    pub machine_id: String,
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub cpu_count: usize,
    /// Physical interface MACs, lowercase and sorted
    pub mac_addresses: Vec<String>,
}

/// A resolved hardware fingerprint and its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareId {
    pub id: String,
    pub source: FingerprintSource,
}
