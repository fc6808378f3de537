//! License tiers, feature identifiers and resource limit presets.
//!
//! Tiers form an ordered ladder. Each tier's effective feature set is the
//! union of its own preset and every lower tier's preset:
//!
//! ```text
//! enterprise ─┬─ ENTERPRISE_FEATURES
//!             └─ pro / trial ─┬─ PRO_FEATURES
//!                             └─ community ── COMMUNITY_FEATURES
//! ```

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// Community connectors and basics
pub const FEATURE_POSTGRES: &str = "postgres";
pub const FEATURE_MYSQL: &str = "mysql";
pub const FEATURE_KAFKA_SINK: &str = "kafka_sink";
pub const FEATURE_WEBHOOK_SINK: &str = "webhook_sink";
pub const FEATURE_BASIC_TRANSFORMS: &str = "basic_transforms";
pub const FEATURE_CLI: &str = "cli";

// Pro connectors and reliability
pub const FEATURE_MONGODB: &str = "mongodb";
pub const FEATURE_SQLSERVER: &str = "sqlserver";
pub const FEATURE_SNOWFLAKE_SINK: &str = "snowflake_sink";
pub const FEATURE_BIGQUERY_SINK: &str = "bigquery_sink";
pub const FEATURE_SCHEMA_REGISTRY: &str = "schema_registry";
pub const FEATURE_DEAD_LETTER_QUEUE: &str = "dead_letter_queue";
pub const FEATURE_EXACTLY_ONCE: &str = "exactly_once";
pub const FEATURE_ADVANCED_TRANSFORMS: &str = "advanced_transforms";

// Enterprise
pub const FEATURE_ORACLE: &str = "oracle";
pub const FEATURE_DB2: &str = "db2";
pub const FEATURE_SAP_HANA: &str = "sap_hana";
pub const FEATURE_SSO: &str = "sso";
pub const FEATURE_AUDIT_LOG: &str = "audit_log";
pub const FEATURE_MULTI_REGION: &str = "multi_region";
pub const FEATURE_CUSTOM_CONNECTORS: &str = "custom_connectors";
pub const FEATURE_PRIORITY_SUPPORT: &str = "priority_support";

pub const COMMUNITY_FEATURES: &[&str] = &[
    FEATURE_POSTGRES,
    FEATURE_MYSQL,
    FEATURE_KAFKA_SINK,
    FEATURE_WEBHOOK_SINK,
    FEATURE_BASIC_TRANSFORMS,
    FEATURE_CLI,
];

pub const PRO_FEATURES: &[&str] = &[
    FEATURE_MONGODB,
    FEATURE_SQLSERVER,
    FEATURE_SNOWFLAKE_SINK,
    FEATURE_BIGQUERY_SINK,
    FEATURE_SCHEMA_REGISTRY,
    FEATURE_DEAD_LETTER_QUEUE,
    FEATURE_EXACTLY_ONCE,
    FEATURE_ADVANCED_TRANSFORMS,
];

pub const ENTERPRISE_FEATURES: &[&str] = &[
    FEATURE_ORACLE,
    FEATURE_DB2,
    FEATURE_SAP_HANA,
    FEATURE_SSO,
    FEATURE_AUDIT_LOG,
    FEATURE_MULTI_REGION,
    FEATURE_CUSTOM_CONNECTORS,
    FEATURE_PRIORITY_SUPPORT,
];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Tier {
    Community,
    Pro,
    /// Time-limited evaluation. Carries Pro defaults under its own tag.
    Trial,
    Enterprise,
}

impl Tier {
    /// Position on the tier ladder. Trial ranks with Pro.
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Community => 0,
            Tier::Pro | Tier::Trial => 1,
            Tier::Enterprise => 2,
        }
    }

    /// Feature presets owned by each rung up to and including this tier,
    /// lowest first.
    fn preset_layers(&self) -> &'static [&'static [&'static str]] {
        match self {
            Tier::Community => &[COMMUNITY_FEATURES],
            Tier::Pro | Tier::Trial => &[COMMUNITY_FEATURES, PRO_FEATURES],
            Tier::Enterprise => &[COMMUNITY_FEATURES, PRO_FEATURES, ENTERPRISE_FEATURES],
        }
    }

    /// Effective default feature set for this tier.
    pub fn features(&self) -> Vec<&'static str> {
        self.preset_layers().iter().flat_map(|layer| layer.iter().copied()).collect()
    }

    pub fn includes_feature(&self, feature: &str) -> bool {
        self.preset_layers()
            .iter()
            .any(|layer| layer.contains(&feature))
    }

    pub fn limits(&self) -> Limits {
        match self {
            Tier::Community => Limits::COMMUNITY,
            Tier::Pro | Tier::Trial => Limits::PRO,
            Tier::Enterprise => Limits::ENTERPRISE,
        }
    }
}

/// Minimum tier whose preset unlocks `feature`.
///
/// Unknown features report Community: they are not gated by a tier preset
/// and can only be granted through a license's explicit feature list.
pub fn required_tier_for(feature: &str) -> Tier {
    if ENTERPRISE_FEATURES.contains(&feature) {
        Tier::Enterprise
    } else if PRO_FEATURES.contains(&feature) {
        Tier::Pro
    } else {
        Tier::Community
    }
}

/// Feature a source connector type needs before it can be admitted.
pub fn connector_feature(source_type: &str) -> Option<&'static str> {
    match source_type.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Some(FEATURE_POSTGRES),
        "mysql" | "mariadb" => Some(FEATURE_MYSQL),
        "mongodb" | "mongo" => Some(FEATURE_MONGODB),
        "sqlserver" | "mssql" => Some(FEATURE_SQLSERVER),
        "oracle" => Some(FEATURE_ORACLE),
        "db2" => Some(FEATURE_DB2),
        "sap_hana" | "hana" => Some(FEATURE_SAP_HANA),
        _ => None,
    }
}

/// Countable resources a license bounds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LimitKind {
    Sources,
    Tables,
    Throughput,
    RetentionDays,
}

/// Resource limits. `0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Limits {
    pub max_sources: u64,
    pub max_tables: u64,
    /// Events per second
    pub max_throughput: u64,
    pub max_retention_days: u64,
}

impl Limits {
    pub const COMMUNITY: Limits = Limits {
        max_sources: 1,
        max_tables: 10,
        max_throughput: 1_000,
        max_retention_days: 1,
    };

    pub const PRO: Limits = Limits {
        max_sources: 10,
        max_tables: 100,
        max_throughput: 50_000,
        max_retention_days: 30,
    };

    pub const ENTERPRISE: Limits = Limits {
        max_sources: 0,
        max_tables: 0,
        max_throughput: 0,
        max_retention_days: 0,
    };

    pub fn get(&self, kind: LimitKind) -> u64 {
        match kind {
            LimitKind::Sources => self.max_sources,
            LimitKind::Tables => self.max_tables,
            LimitKind::Throughput => self.max_throughput,
            LimitKind::RetentionDays => self.max_retention_days,
        }
    }

    pub fn is_unlimited(&self, kind: LimitKind) -> bool {
        self.get(kind) == 0
    }

    /// Whether `value` fits under the limit for `kind`.
    pub fn allows(&self, kind: LimitKind, value: u64) -> bool {
        let limit = self.get(kind);
        limit == 0 || value <= limit
    }
}
