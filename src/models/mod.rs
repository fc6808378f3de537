mod device;
mod license;
pub mod tier;

pub use device::*;
pub use license::*;
pub use tier::{
    COMMUNITY_FEATURES, ENTERPRISE_FEATURES, LimitKind, Limits, PRO_FEATURES, Tier,
    connector_feature, required_tier_for,
};
