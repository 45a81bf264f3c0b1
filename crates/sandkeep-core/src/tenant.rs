// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant model.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sandbox::Sandbox;

/// Compute size of a tenant's sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTier {
    /// Smallest instance type.
    Basic,
    /// Default instance type.
    #[default]
    Standard,
    /// Larger instance type for heavy workloads.
    Performance,
}

impl ResourceTier {
    /// Value exported to the service process environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceTier::Basic => "basic",
            ResourceTier::Standard => "standard",
            ResourceTier::Performance => "performance",
        }
    }
}

impl fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ResourceTier::Basic),
            "standard" => Ok(ResourceTier::Standard),
            "performance" => Ok(ResourceTier::Performance),
            other => Err(format!("unknown resource tier: {}", other)),
        }
    }
}

/// A tenant and the handle to its sandbox.
///
/// Created on first access. The core never destroys tenants.
#[derive(Clone)]
pub struct Tenant {
    /// Tenant identifier, also the key in every per-tenant registry.
    pub id: String,
    /// Handle to the tenant's compute unit.
    pub sandbox: Arc<dyn Sandbox>,
    /// Resource tier.
    pub tier: ResourceTier,
}

impl Tenant {
    /// Create a tenant on the default tier.
    pub fn new(id: impl Into<String>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            id: id.into(),
            sandbox,
            tier: ResourceTier::default(),
        }
    }

    /// Set the resource tier.
    pub fn with_tier(mut self, tier: ResourceTier) -> Self {
        self.tier = tier;
        self
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("id", &self.id)
            .field("sandbox_id", &self.sandbox.sandbox_id())
            .field("tier", &self.tier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MockSandbox;

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("Performance".parse::<ResourceTier>(), Ok(ResourceTier::Performance));
        assert_eq!(ResourceTier::Basic.to_string(), "basic");
        assert!("huge".parse::<ResourceTier>().is_err());
    }

    #[test]
    fn test_tenant_debug_shows_sandbox() {
        let tenant = Tenant::new("acme", Arc::new(MockSandbox::new("sbx-acme")))
            .with_tier(ResourceTier::Basic);
        let debug = format!("{:?}", tenant);
        assert!(debug.contains("acme"));
        assert!(debug.contains("sbx-acme"));
        assert!(debug.contains("Basic"));
    }
}
