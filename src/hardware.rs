//! Hardware fingerprinting for license binding.
//!
//! The standard fingerprint hashes the OS machine ID, platform,
//! architecture and physical MAC addresses. Inside Kubernetes those are
//! unstable across pod rescheduling, so a fingerprint derived from the
//! pod's cluster identity is used instead.

use std::env;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::models::{FingerprintSource, HardwareId, HardwareInfo};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const KUBERNETES_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Interface name prefixes that never carry a stable physical MAC.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "cni", "flannel", "cali", "vxlan", "tun", "tap",
];

/// MAC prefixes of virtual or null adapters.
const VIRTUAL_MAC_PREFIXES: &[&str] = &["02:42", "00:00:00"];

impl HardwareInfo {
    /// Collects identity components of the current machine.
    pub fn collect() -> Self {
        Self {
            machine_id: machine_id(),
            hostname: hostname(),
            platform: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            mac_addresses: filter_mac_addresses(interface_macs()),
        }
    }

    /// 32-hex-char fingerprint of machine ID, platform, arch and MACs.
    pub fn fingerprint(&self) -> String {
        let combined = format!(
            "{}|{}|{}|[{}]",
            self.machine_id,
            self.platform,
            self.arch,
            self.mac_addresses.join(" ")
        );
        short_hash(&combined)
    }

    /// Whether any machine-specific component was found.
    pub fn has_machine_identity(&self) -> bool {
        !self.machine_id.is_empty() || !self.mac_addresses.is_empty()
    }
}

/// Standard hardware ID. Degrades to a hash of platform and arch alone when
/// the machine ID and MACs are unavailable; never fails.
pub fn generate_hardware_id() -> String {
    HardwareInfo::collect().fingerprint()
}

/// Best available hardware ID: Kubernetes identity, then the standard
/// fingerprint, then a hash of the hostname. Empty means binding is
/// unavailable.
pub fn get_hardware_id_with_fallback() -> String {
    resolve_hardware_id().id
}

/// Like [`get_hardware_id_with_fallback`], also reporting the source used.
pub fn resolve_hardware_id() -> HardwareId {
    if is_kubernetes()
        && let Some(identity) = KubernetesIdentity::from_env()
    {
        tracing::debug!(
            namespace = %identity.namespace,
            pod = %identity.pod_name,
            "Using Kubernetes-derived hardware ID"
        );
        return HardwareId {
            id: identity.fingerprint(),
            source: FingerprintSource::Kubernetes,
        };
    }

    let info = HardwareInfo::collect();
    if info.has_machine_identity() {
        return HardwareId {
            id: info.fingerprint(),
            source: FingerprintSource::Machine,
        };
    }

    if !info.hostname.is_empty() {
        tracing::warn!("No machine ID or MAC address found, falling back to hostname hash");
        return HardwareId {
            id: short_hash(&info.hostname),
            source: FingerprintSource::Hostname,
        };
    }

    tracing::warn!("Unable to derive a hardware ID, hardware binding unavailable");
    HardwareId {
        id: String::new(),
        source: FingerprintSource::None,
    }
}

/// Whether this process runs inside a Kubernetes pod.
pub fn is_kubernetes() -> bool {
    env::var_os(KUBERNETES_ENV).is_some() || Path::new(SERVICE_ACCOUNT_DIR).exists()
}

/// Cluster identity of the current pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesIdentity {
    pub namespace: String,
    pub pod_name: String,
    pub node_name: String,
    pub service_account: String,
}

impl KubernetesIdentity {
    /// Reads the downward-API env vars and the mounted service account.
    /// Returns None when neither a pod name nor a namespace is known.
    pub fn from_env() -> Option<Self> {
        let namespace = env::var("POD_NAMESPACE")
            .ok()
            .or_else(|| {
                std::fs::read_to_string(Path::new(SERVICE_ACCOUNT_DIR).join("namespace")).ok()
            })
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let pod_name = env::var("POD_NAME")
            .or_else(|_| env::var("HOSTNAME"))
            .unwrap_or_default();
        let node_name = env::var("NODE_NAME").unwrap_or_default();
        let service_account = env::var("POD_SERVICE_ACCOUNT")
            .or_else(|_| env::var("SERVICE_ACCOUNT"))
            .unwrap_or_default();

        if namespace.is_empty() && pod_name.is_empty() {
            return None;
        }

        Some(Self {
            namespace,
            pod_name,
            node_name,
            service_account,
        })
    }

    pub fn fingerprint(&self) -> String {
        short_hash(&format!(
            "k8s|{}|{}|{}|{}",
            self.namespace, self.pod_name, self.node_name, self.service_account
        ))
    }
}

/// SHA-256, first 16 bytes, lowercase hex.
fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..16])
}

/// Keeps physical adapter MACs only, lowercase, sorted and deduplicated.
///
/// Input pairs are `(interface name, mac)`.
pub fn filter_mac_addresses(interfaces: Vec<(String, String)>) -> Vec<String> {
    let mut macs: Vec<String> = interfaces
        .into_iter()
        .filter(|(name, _)| {
            !VIRTUAL_INTERFACE_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
        .map(|(_, mac)| mac.trim().to_ascii_lowercase().replace('-', ":"))
        .filter(|mac| !mac.is_empty())
        .filter(|mac| {
            !VIRTUAL_MAC_PREFIXES
                .iter()
                .any(|prefix| mac.starts_with(prefix))
        })
        .collect();
    macs.sort();
    macs.dedup();
    macs
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

/// Gets the machine ID (platform-specific unique identifier).
fn machine_id() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
            .unwrap_or_default()
    }

    #[cfg(target_os = "windows")]
    {
        use winreg::RegKey;
        use winreg::enums::HKEY_LOCAL_MACHINE;

        RegKey::predef(HKEY_LOCAL_MACHINE)
            .open_subkey("SOFTWARE\\Microsoft\\Cryptography")
            .and_then(|key| key.get_value::<String, _>("MachineGuid"))
            .unwrap_or_default()
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        String::new()
    }
}

/// Enumerates `(interface name, mac)` pairs.
fn interface_macs() -> Vec<(String, String)> {
    #[cfg(target_os = "linux")]
    {
        let Ok(entries) = std::fs::read_dir("/sys/class/net") else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let mac = std::fs::read_to_string(entry.path().join("address")).ok()?;
                Some((name, mac))
            })
            .collect()
    }

    #[cfg(target_os = "macos")]
    {
        // ifconfig prints "en0: flags=..." followed by an indented "ether xx:xx:..." line
        let Some(output) = std::process::Command::new("ifconfig")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
        else {
            return Vec::new();
        };
        let mut current = String::new();
        let mut pairs = Vec::new();
        for line in output.lines() {
            if !line.starts_with(char::is_whitespace) {
                current = line.split(':').next().unwrap_or_default().to_string();
            } else if let Some(mac) = line.trim().strip_prefix("ether ") {
                pairs.push((current.clone(), mac.trim().to_string()));
            }
        }
        pairs
    }

    #[cfg(target_os = "windows")]
    {
        // getmac CSV rows: "Connection Name","Network Adapter","Physical Address","Transport Name"
        let Some(output) = std::process::Command::new("getmac")
            .args(["/fo", "csv", "/nh", "/v"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
        else {
            return Vec::new();
        };
        output
            .lines()
            .filter_map(|line| {
                let cols: Vec<&str> = line.split("\",\"").map(|c| c.trim_matches('"')).collect();
                let name = cols.first()?.to_ascii_lowercase();
                let mac = cols.get(2)?;
                mac.contains('-').then(|| (name, mac.to_string()))
            })
            .collect()
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        Vec::new()
    }
}
