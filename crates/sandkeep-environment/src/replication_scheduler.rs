// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic replication of awake tenants.
//!
//! Every interval the scheduler runs a full replication for each registered
//! tenant whose service process is running. Tenants that are hibernating or
//! whose service is down are skipped: a scheduled backup never wakes a
//! sandbox. Tenants are replicated concurrently; each pass is bounded by the
//! engine's own timeout.

use std::sync::Arc;
use std::time::Duration;

use sandkeep_core::replication::{ReplicationEngine, ReplicationOptions, ReplicationTrigger};
use sandkeep_core::tenant::Tenant;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::tenants::TenantRegistry;

/// Replication scheduler configuration.
#[derive(Debug, Clone)]
pub struct ReplicationSchedulerConfig {
    /// Time between passes.
    pub interval: Duration,
    /// Command identifying the tenant service process.
    pub service_command: String,
}

impl Default for ReplicationSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            service_command: "start-service.sh".to_string(),
        }
    }
}

/// Counts from one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerPass {
    /// Tenants replicated successfully.
    pub replicated: usize,
    /// Tenants whose replication failed.
    pub failed: usize,
    /// Tenants skipped because their service was not running.
    pub skipped: usize,
}

/// Background worker that replicates awake tenants on an interval.
pub struct ReplicationScheduler {
    registry: Arc<TenantRegistry>,
    engine: Arc<ReplicationEngine>,
    config: ReplicationSchedulerConfig,
    shutdown: Arc<Notify>,
}

impl ReplicationScheduler {
    /// Create a new scheduler.
    pub fn new(
        registry: Arc<TenantRegistry>,
        engine: Arc<ReplicationEngine>,
        config: ReplicationSchedulerConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduler loop until shutdown is signalled.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Replication scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Replication scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    let pass = self.run_once().await;
                    if pass.failed > 0 {
                        error!(
                            replicated = pass.replicated,
                            failed = pass.failed,
                            skipped = pass.skipped,
                            "Scheduled replication pass had failures"
                        );
                    } else {
                        info!(
                            replicated = pass.replicated,
                            skipped = pass.skipped,
                            "Scheduled replication pass finished"
                        );
                    }
                }
            }
        }

        info!("Replication scheduler stopped");
    }

    /// Run one pass over every registered tenant.
    pub async fn run_once(&self) -> SchedulerPass {
        let mut pass = SchedulerPass::default();
        let mut tasks = JoinSet::new();

        for tenant in self.registry.list() {
            if !self.service_running(&tenant).await {
                pass.skipped += 1;
                continue;
            }

            let engine = self.engine.clone();
            tasks.spawn(async move {
                engine
                    .replicate_all(
                        &tenant,
                        ReplicationOptions::triggered_by(ReplicationTrigger::Scheduled),
                    )
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) if result.success => pass.replicated += 1,
                Ok(_) => pass.failed += 1,
                Err(e) => {
                    error!(error = %e, "Replication task panicked");
                    pass.failed += 1;
                }
            }
        }

        pass
    }

    async fn service_running(&self, tenant: &Tenant) -> bool {
        match tenant.sandbox.list_processes().await {
            Ok(processes) => {
                let running = processes
                    .iter()
                    .any(|p| p.is_alive() && p.command.contains(&self.config.service_command));
                if !running {
                    debug!(tenant_id = %tenant.id, "Service not running, skipping replication");
                }
                running
            }
            Err(e) => {
                if e.class().is_retryable() {
                    debug!(tenant_id = %tenant.id, error = %e, "Sandbox not reachable, skipping replication");
                } else {
                    warn!(tenant_id = %tenant.id, error = %e, "Failed to list processes, skipping replication");
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ReplicationSchedulerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.service_command, "start-service.sh");
    }
}
