// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable fleet runtime.
//!
//! [`FleetRuntime`] wires the tenant registry, wake controller, replication
//! engine, restart orchestrator and replication scheduler together so the
//! engine can run inside an existing tokio application.
//!
//! ```rust,ignore
//! use sandkeep_environment::runtime::FleetRuntime;
//!
//! let runtime = FleetRuntime::builder()
//!     .data_dir("/var/lib/sandkeep")
//!     .durable_root("/mnt/durable")
//!     .tenants(["acme", "globex"])
//!     .build()?
//!     .start()
//!     .await?;
//!
//! runtime.wake("acme").await?;
//! runtime.shutdown().await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sandkeep_core::health::HealthProbe;
use sandkeep_core::object_store::ObjectStore;
use sandkeep_core::replication::{
    ReplicationConfig, ReplicationEngine, ReplicationOptions, ReplicationResult,
};
use sandkeep_core::shutdown::{
    RestartHandle, RestartOrchestrator, ShutdownConfig, ShutdownCoordinator,
};
use sandkeep_core::wake::{WakeConfig, WakeController, WakeReport};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::fs_store::FsObjectStore;
use crate::replication_scheduler::{ReplicationScheduler, ReplicationSchedulerConfig};
use crate::tenants::{LocalSandboxProvider, SandboxProvider, TenantRegistry};

/// Builder for creating a [`FleetRuntime`].
pub struct FleetRuntimeBuilder {
    data_dir: PathBuf,
    provider: Option<Arc<dyn SandboxProvider>>,
    durable_root: Option<PathBuf>,
    store: Option<Arc<dyn ObjectStore>>,
    wake: WakeConfig,
    replication: ReplicationConfig,
    shutdown: ShutdownConfig,
    replication_interval: Duration,
    tenants: Vec<String>,
}

impl Default for FleetRuntimeBuilder {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".data"),
            provider: None,
            durable_root: None,
            store: None,
            wake: WakeConfig::default(),
            replication: ReplicationConfig::default(),
            shutdown: ShutdownConfig::default(),
            replication_interval: Duration::from_secs(300),
            tenants: Vec::new(),
        }
    }
}

impl FleetRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply settings loaded from the environment.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new()
            .data_dir(&config.data_dir)
            .service_command(&config.service_command)
            .config_dir(&config.config_dir)
            .workspace_dir(&config.workspace_dir)
            .wake_timeout(config.wake_timeout)
            .replication_interval(config.replication_interval)
            .tenants(config.tenants.iter().cloned());
        if let Some(port) = config.service_port {
            builder = builder.service_port(port);
        }
        if let Some(root) = &config.durable_root {
            builder = builder.durable_root(root);
        }
        builder
    }

    /// Root directory for local sandboxes.
    ///
    /// Default: `.data`
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Use a custom sandbox provider instead of local sandboxes.
    pub fn sandbox_provider(mut self, provider: Arc<dyn SandboxProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Back the durable store with a directory. Mirrors are written under
    /// the same root.
    ///
    /// Default: unset (replication reports a configuration error)
    pub fn durable_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.durable_root = Some(path.into());
        self
    }

    /// Use a custom durable store. Takes precedence over
    /// [`durable_root`](Self::durable_root) for markers.
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Command that starts the tenant service.
    ///
    /// Default: `start-service.sh`
    pub fn service_command(mut self, command: impl Into<String>) -> Self {
        self.wake.service.command = command.into();
        self
    }

    /// Port the service listens on once ready.
    pub fn service_port(mut self, port: u16) -> Self {
        self.wake.service.port = Some(port);
        self
    }

    /// Tenant configuration tree.
    ///
    /// Default: `/root/.gateway`
    pub fn config_dir(mut self, dir: impl Into<String>) -> Self {
        self.replication.config_dir = dir.into();
        self
    }

    /// Tenant workspace tree.
    ///
    /// Default: `/root/workspace`
    pub fn workspace_dir(mut self, dir: impl Into<String>) -> Self {
        self.replication.workspace_dir = dir.into();
        self
    }

    /// Default budget for [`FleetRuntime::wake`].
    ///
    /// Default: 180 seconds
    pub fn wake_timeout(mut self, timeout: Duration) -> Self {
        self.wake.default_max_wait = timeout;
        self
    }

    /// Replace the whole wake configuration.
    pub fn wake_config(mut self, config: WakeConfig) -> Self {
        self.wake = config;
        self
    }

    /// Replace the whole replication configuration.
    pub fn replication_config(mut self, config: ReplicationConfig) -> Self {
        self.replication = config;
        self
    }

    /// Replace the shutdown and restart budgets.
    pub fn shutdown_config(mut self, config: ShutdownConfig) -> Self {
        self.shutdown = config;
        self
    }

    /// Interval between scheduled replication passes.
    ///
    /// Default: 5 minutes
    pub fn replication_interval(mut self, interval: Duration) -> Self {
        self.replication_interval = interval;
        self
    }

    /// Tenants registered at start.
    pub fn tenants<I, S>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tenants = tenants.into_iter().map(Into::into).collect();
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<FleetRuntimeConfig> {
        if self.replication_interval.is_zero() {
            anyhow::bail!("replication_interval must be greater than zero");
        }
        if self.wake.service.command.trim().is_empty() {
            anyhow::bail!("service command must not be empty");
        }
        if self.wake.default_max_wait >= self.wake.registry_ttl {
            anyhow::bail!(
                "wake timeout {:?} must be shorter than the wake registry TTL {:?}",
                self.wake.default_max_wait,
                self.wake.registry_ttl
            );
        }

        let mut replication = self.replication;
        if let Some(root) = &self.durable_root {
            replication.durable_mount = root.to_string_lossy().into_owned();
        }

        let store = match (self.store, &self.durable_root) {
            (Some(store), _) => Some(store),
            (None, Some(root)) => Some(Arc::new(FsObjectStore::new(root)) as Arc<dyn ObjectStore>),
            (None, None) => None,
        };

        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(LocalSandboxProvider::new(&self.data_dir)));

        Ok(FleetRuntimeConfig {
            provider,
            store,
            wake: self.wake,
            replication,
            shutdown: self.shutdown,
            replication_interval: self.replication_interval,
            tenants: self.tenants,
        })
    }
}

/// Configuration for a [`FleetRuntime`].
pub struct FleetRuntimeConfig {
    provider: Arc<dyn SandboxProvider>,
    store: Option<Arc<dyn ObjectStore>>,
    wake: WakeConfig,
    replication: ReplicationConfig,
    shutdown: ShutdownConfig,
    replication_interval: Duration,
    tenants: Vec<String>,
}

impl FleetRuntimeConfig {
    /// Register the startup tenants and spawn the replication scheduler.
    pub async fn start(self) -> Result<FleetRuntime> {
        let registry = Arc::new(TenantRegistry::new(self.provider));
        for tenant_id in &self.tenants {
            registry.get_or_create(tenant_id)?;
        }

        if self.store.is_none() {
            warn!("No durable store configured; replication will report configuration errors");
        }

        let service_command = self.wake.service.command.clone();
        let default_wake_timeout = self.wake.default_max_wait;
        let wake = Arc::new(WakeController::with_config(self.wake, HealthProbe::default()));
        let engine = Arc::new(ReplicationEngine::new(self.replication, self.store));
        let orchestrator = RestartOrchestrator::new(
            ShutdownCoordinator::new(engine.clone(), self.shutdown),
            wake.clone(),
        );

        let scheduler = ReplicationScheduler::new(
            registry.clone(),
            engine.clone(),
            ReplicationSchedulerConfig {
                interval: self.replication_interval,
                service_command,
            },
        );
        let scheduler_shutdown = scheduler.shutdown_handle();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        info!(
            tenants = registry.len(),
            replication_interval_secs = self.replication_interval.as_secs(),
            "FleetRuntime started"
        );

        Ok(FleetRuntime {
            registry,
            wake,
            engine,
            orchestrator,
            default_wake_timeout,
            scheduler_handle,
            scheduler_shutdown,
        })
    }
}

/// A running fleet runtime.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct FleetRuntime {
    registry: Arc<TenantRegistry>,
    wake: Arc<WakeController>,
    engine: Arc<ReplicationEngine>,
    orchestrator: RestartOrchestrator,
    default_wake_timeout: Duration,
    scheduler_handle: JoinHandle<()>,
    scheduler_shutdown: Arc<Notify>,
}

impl FleetRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> FleetRuntimeBuilder {
        FleetRuntimeBuilder::new()
    }

    /// Tenant registry.
    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Wake controller.
    pub fn wake_controller(&self) -> &Arc<WakeController> {
        &self.wake
    }

    /// Replication engine.
    pub fn engine(&self) -> &Arc<ReplicationEngine> {
        &self.engine
    }

    /// Make a tenant's sandbox ready, registering the tenant if needed.
    pub async fn wake(&self, tenant_id: &str) -> Result<WakeReport> {
        let tenant = self.registry.get_or_create(tenant_id)?;
        Ok(self
            .wake
            .ensure_ready(&tenant, self.default_wake_timeout)
            .await?)
    }

    /// Run a manual full replication.
    pub async fn replicate(&self, tenant_id: &str) -> Result<ReplicationResult> {
        let tenant = self.registry.get_or_create(tenant_id)?;
        Ok(self
            .engine
            .replicate_all(&tenant, ReplicationOptions::default())
            .await)
    }

    /// Sync, kill and re-wake a tenant's sandbox.
    pub async fn restart(&self, tenant_id: &str) -> Result<RestartHandle> {
        let tenant = self.registry.get_or_create(tenant_id)?;
        Ok(self.orchestrator.restart(&tenant).await)
    }

    /// Stop the replication scheduler and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("FleetRuntime shutting down...");

        self.scheduler_shutdown.notify_one();

        if let Err(e) = self.scheduler_handle.await {
            error!("Replication scheduler task panicked: {}", e);
        }

        debug!(tenants = self.registry.len(), "Tenants left registered");
        info!("FleetRuntime shutdown complete");
        Ok(())
    }
}
