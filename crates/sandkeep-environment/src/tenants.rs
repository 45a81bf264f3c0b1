// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant registry.
//!
//! Tenants are created on first access and kept for the life of the
//! process. Each gets one sandbox handle from a [`SandboxProvider`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sandkeep_core::sandbox::Sandbox;
use sandkeep_core::tenant::{ResourceTier, Tenant};
use tracing::info;

use crate::error::{Error, Result};
use crate::local_sandbox::LocalSandbox;

/// Creates the sandbox handle for a tenant.
pub trait SandboxProvider: Send + Sync {
    /// Sandbox for `tenant_id`. Called once per tenant.
    fn sandbox_for(&self, tenant_id: &str) -> Result<Arc<dyn Sandbox>>;
}

impl<F> SandboxProvider for F
where
    F: Fn(&str) -> Result<Arc<dyn Sandbox>> + Send + Sync,
{
    fn sandbox_for(&self, tenant_id: &str) -> Result<Arc<dyn Sandbox>> {
        self(tenant_id)
    }
}

/// Provides a [`LocalSandbox`] rooted at `{data_dir}/{tenant_id}`.
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    data_dir: PathBuf,
}

impl LocalSandboxProvider {
    /// Create a provider rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl SandboxProvider for LocalSandboxProvider {
    fn sandbox_for(&self, tenant_id: &str) -> Result<Arc<dyn Sandbox>> {
        Ok(Arc::new(LocalSandbox::new(
            tenant_id,
            self.data_dir.join(tenant_id),
        )))
    }
}

/// Tenant ids end up in paths and store keys.
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= 64
        && !tenant_id.starts_with(['-', '.'])
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTenantId(tenant_id.to_string()))
    }
}

/// Registry of known tenants.
pub struct TenantRegistry {
    provider: Arc<dyn SandboxProvider>,
    tenants: Mutex<HashMap<String, Tenant>>,
}

impl TenantRegistry {
    /// Create an empty registry.
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Return the tenant, creating it on the default tier if unknown.
    pub fn get_or_create(&self, tenant_id: &str) -> Result<Tenant> {
        self.get_or_create_with_tier(tenant_id, ResourceTier::default())
    }

    /// Return the tenant, creating it on `tier` if unknown. An existing
    /// tenant keeps its tier.
    pub fn get_or_create_with_tier(&self, tenant_id: &str, tier: ResourceTier) -> Result<Tenant> {
        validate_tenant_id(tenant_id)?;

        let mut tenants = self.tenants.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tenant) = tenants.get(tenant_id) {
            return Ok(tenant.clone());
        }

        let sandbox = self.provider.sandbox_for(tenant_id)?;
        let tenant = Tenant::new(tenant_id, sandbox).with_tier(tier);
        tenants.insert(tenant_id.to_string(), tenant.clone());
        info!(tenant_id = %tenant_id, tier = %tier, "Registered tenant");
        Ok(tenant)
    }

    /// Look up a tenant without creating it.
    pub fn get(&self, tenant_id: &str) -> Option<Tenant> {
        self.tenants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant_id)
            .cloned()
    }

    /// All registered tenants, ordered by id.
    pub fn list(&self) -> Vec<Tenant> {
        let tenants = self.tenants.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<Tenant> = tenants.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Number of registered tenants.
    pub fn len(&self) -> usize {
        self.tenants.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if no tenant is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
