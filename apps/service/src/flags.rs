//! Enablement boundary.
//!
//! Which regions and capabilities a caller may use is decided outside the
//! engine (a feature-flag service, an admin panel, a config file). The engine
//! only asks yes/no questions through [`Enablement`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::FlagsConfig;
use crate::monitoring::ProbeKind;
use crate::registry::Region;

/// Optional engine capabilities gated per caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    LoadTesting,
    HealthChecks,
    TestAllRegions,
}

impl Capability {
    /// Capability a probe kind requires, if any
    pub fn for_kind(kind: ProbeKind) -> Option<Self> {
        match kind {
            ProbeKind::Load => Some(Capability::LoadTesting),
            ProbeKind::Health => Some(Capability::HealthChecks),
            ProbeKind::Connection | ProbeKind::Latency => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::LoadTesting => write!(f, "load testing"),
            Capability::HealthChecks => write!(f, "health checks"),
            Capability::TestAllRegions => write!(f, "test all regions"),
        }
    }
}

/// Boolean answers from an external flag provider
pub trait Enablement: Send + Sync {
    fn region_enabled(&self, region: &Region, actor_key: Option<&str>) -> bool;

    fn capability_enabled(&self, capability: Capability, actor_key: Option<&str>) -> bool;
}

/// Flags fixed at startup, the same for every caller
#[derive(Debug, Clone)]
pub struct StaticFlags {
    load_testing: bool,
    health_checks: bool,
    test_all_regions: bool,
    disabled_regions: HashSet<String>,
}

impl StaticFlags {
    /// Everything on; regions follow their registry `enabled` value
    pub fn all_enabled() -> Self {
        Self::from(&FlagsConfig::default())
    }

    pub fn disable(mut self, capability: Capability) -> Self {
        match capability {
            Capability::LoadTesting => self.load_testing = false,
            Capability::HealthChecks => self.health_checks = false,
            Capability::TestAllRegions => self.test_all_regions = false,
        }
        self
    }

    pub fn disable_region(mut self, region_id: impl Into<String>) -> Self {
        self.disabled_regions.insert(region_id.into());
        self
    }
}

impl From<&FlagsConfig> for StaticFlags {
    fn from(config: &FlagsConfig) -> Self {
        Self {
            load_testing: config.load_testing,
            health_checks: config.health_checks,
            test_all_regions: config.test_all_regions,
            disabled_regions: config.disabled_regions.iter().cloned().collect(),
        }
    }
}

impl Enablement for StaticFlags {
    fn region_enabled(&self, region: &Region, _actor_key: Option<&str>) -> bool {
        region.enabled && !self.disabled_regions.contains(&region.id)
    }

    fn capability_enabled(&self, capability: Capability, _actor_key: Option<&str>) -> bool {
        match capability {
            Capability::LoadTesting => self.load_testing,
            Capability::HealthChecks => self.health_checks,
            Capability::TestAllRegions => self.test_all_regions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Endpoint;

    fn region(id: &str, enabled: bool) -> Region {
        Region {
            id: id.to_string(),
            display_name: id.to_string(),
            endpoint: Endpoint::new("localhost", 5432, "postgres", "postgres"),
            enabled,
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn test_capability_for_kind() {
        assert_eq!(Capability::for_kind(ProbeKind::Load), Some(Capability::LoadTesting));
        assert_eq!(Capability::for_kind(ProbeKind::Health), Some(Capability::HealthChecks));
        assert_eq!(Capability::for_kind(ProbeKind::Latency), None);
    }

    #[test]
    fn test_static_flags_regions() {
        let flags = StaticFlags::all_enabled().disable_region("asia-pacific");
        assert!(flags.region_enabled(&region("us-east", true), None));
        assert!(!flags.region_enabled(&region("us-east", false), None));
        assert!(!flags.region_enabled(&region("asia-pacific", true), Some("user-1")));
    }

    #[test]
    fn test_static_flags_capabilities() {
        let flags = StaticFlags::all_enabled().disable(Capability::LoadTesting);
        assert!(!flags.capability_enabled(Capability::LoadTesting, None));
        assert!(flags.capability_enabled(Capability::HealthChecks, None));
        assert!(flags.capability_enabled(Capability::TestAllRegions, None));
    }
}
