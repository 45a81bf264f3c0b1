// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pre-shutdown sync and restart sequencing.
//!
//! [`ShutdownCoordinator::sync_before_shutdown`] protects the critical subset
//! first and spends whatever budget is left on a full pass.
//! [`RestartOrchestrator::restart`] runs that sync under a fixed ceiling,
//! kills the sandbox's processes and hands the re-wake to a background task.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use crate::replication::{
    ReplicationEngine, ReplicationOptions, ReplicationResult, ReplicationTrigger, SyncOutcome,
};
use crate::sandbox;
use crate::tenant::Tenant;
use crate::wake::WakeController;

/// Shutdown and restart budgets.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound for the critical pass.
    pub critical_budget: Duration,
    /// The full pass is skipped when less than this remains.
    pub min_full_budget: Duration,
    /// Deadline handed to `sync_before_shutdown` by `restart`.
    pub restart_sync_deadline: Duration,
    /// Hard ceiling on the whole pre-restart sync.
    pub restart_ceiling: Duration,
    /// Upper bound for terminating the sandbox's processes.
    pub kill_timeout: Duration,
    /// Pause between killing processes and re-waking.
    pub settle_delay: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            critical_budget: Duration::from_secs(10),
            min_full_budget: Duration::from_secs(5),
            restart_sync_deadline: Duration::from_secs(45),
            restart_ceiling: Duration::from_secs(50),
            kill_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Runs the critical pass, then the full pass if the deadline allows.
pub struct ShutdownCoordinator {
    engine: Arc<ReplicationEngine>,
    config: ShutdownConfig,
}

impl ShutdownCoordinator {
    /// Create a coordinator.
    pub fn new(engine: Arc<ReplicationEngine>, config: ShutdownConfig) -> Self {
        Self { engine, config }
    }

    /// Coordinator configuration.
    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Best-effort sync within `deadline`.
    ///
    /// The critical outcome never stops the sequence. If less than
    /// `min_full_budget` remains afterwards, the critical result is returned
    /// as is. Otherwise the full pass runs with the remaining budget; when it
    /// fails after a successful critical pass the result is
    /// [`SyncOutcome::Partial`] and carries the full pass's failure.
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    pub async fn sync_before_shutdown(&self, tenant: &Tenant, deadline: Duration) -> ReplicationResult {
        let started = Instant::now();
        let options = ReplicationOptions::triggered_by(ReplicationTrigger::Shutdown);

        let critical = self
            .engine
            .replicate_critical(
                tenant,
                options.with_timeout(self.config.critical_budget.min(deadline)),
            )
            .await;
        if !critical.success {
            warn!(
                error = ?critical.error,
                "Critical sync failed before shutdown, continuing"
            );
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining < self.config.min_full_budget {
            warn!(
                remaining_ms = remaining.as_millis() as u64,
                min_full_budget_ms = self.config.min_full_budget.as_millis() as u64,
                "Not enough time left for a full sync, keeping critical result"
            );
            return critical;
        }

        let full = self
            .engine
            .replicate_all(tenant, options.with_timeout(remaining))
            .await;
        merge(critical, full)
    }
}

fn merge(critical: ReplicationResult, full: ReplicationResult) -> ReplicationResult {
    if full.success || !critical.success {
        return full;
    }
    ReplicationResult {
        outcome: SyncOutcome::Partial,
        error: full.error,
        duration_ms: critical.duration_ms + full.duration_ms,
        exit_code: full.exit_code.or(critical.exit_code),
        completed_at: full.completed_at,
        ..critical
    }
}

/// Returned to the restart caller before the sandbox is ready again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartResponse {
    /// The processes were terminated (or there was nothing to terminate).
    pub success: bool,
    /// Pre-restart sync, `None` if it hit the ceiling.
    pub sync_result: Option<ReplicationResult>,
    /// Summary for operators.
    pub message: String,
}

/// Restart response plus the background re-wake task.
#[derive(Debug)]
pub struct RestartHandle {
    /// Response for the caller.
    pub response: RestartResponse,
    /// Background re-wake. Detached if dropped.
    pub rewake: JoinHandle<()>,
}

/// Sync, kill, settle, re-wake.
pub struct RestartOrchestrator {
    coordinator: ShutdownCoordinator,
    wake: Arc<WakeController>,
}

impl RestartOrchestrator {
    /// Create an orchestrator.
    pub fn new(coordinator: ShutdownCoordinator, wake: Arc<WakeController>) -> Self {
        Self { coordinator, wake }
    }

    /// The shutdown coordinator.
    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    /// Restart the tenant's service. Returns once processes are killed; the
    /// service comes back in a spawned task.
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    pub async fn restart(&self, tenant: &Tenant) -> RestartHandle {
        let config = self.coordinator.config().clone();

        let sync_result = match tokio::time::timeout(
            config.restart_ceiling,
            self.coordinator
                .sync_before_shutdown(tenant, config.restart_sync_deadline),
        )
        .await
        {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(
                    ceiling_ms = config.restart_ceiling.as_millis() as u64,
                    "Pre-restart sync hit the ceiling, restarting anyway"
                );
                None
            }
        };

        let killed =
            tokio::time::timeout(config.kill_timeout, sandbox::kill_all(tenant.sandbox.as_ref()))
                .await;
        let success = match killed {
            Err(_) => {
                error!(
                    kill_timeout_ms = config.kill_timeout.as_millis() as u64,
                    "Sandbox did not respond while terminating processes"
                );
                false
            }
            Ok(Ok(summary)) => {
                info!(
                    killed = summary.killed,
                    failed = summary.failed,
                    "Terminated sandbox processes"
                );
                true
            }
            Ok(Err(e)) if e.class().is_retryable() => {
                warn!(error = %e, "Could not list processes, assuming none are running");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "Could not terminate sandbox processes");
                false
            }
        };

        tokio::time::sleep(config.settle_delay).await;
        let rewake = self.spawn_rewake(tenant.clone());

        let message = restart_message(success, sync_result.as_ref());
        RestartHandle {
            response: RestartResponse {
                success,
                sync_result,
                message,
            },
            rewake,
        }
    }

    fn spawn_rewake(&self, tenant: Tenant) -> JoinHandle<()> {
        let wake = self.wake.clone();
        let max_wait = wake.config().default_max_wait;
        let span = info_span!("rewake", tenant_id = %tenant.id);
        tokio::spawn(
            async move {
                match wake.ensure_ready(&tenant, max_wait).await {
                    Ok(report) => info!(
                        elapsed_ms = report.elapsed_ms,
                        woke = report.woke,
                        "Sandbox ready after restart"
                    ),
                    Err(e) => error!(error = %e, "Re-wake after restart failed"),
                }
            }
            .instrument(span),
        )
    }
}

fn restart_message(killed: bool, sync: Option<&ReplicationResult>) -> String {
    let sync = match sync {
        None => "pre-restart sync timed out".to_string(),
        Some(r) => match r.outcome {
            SyncOutcome::Complete => format!("state synced ({} files)", r.file_count),
            SyncOutcome::CriticalOnly => "critical state synced, full sync skipped".to_string(),
            SyncOutcome::Partial => format!(
                "critical state synced, full sync failed: {}",
                r.error
                    .as_ref()
                    .map(|e| e.detail.as_str())
                    .unwrap_or("unknown error")
            ),
            SyncOutcome::Failed => format!(
                "sync failed: {}",
                r.error
                    .as_ref()
                    .map(|e| e.detail.as_str())
                    .unwrap_or("unknown error")
            ),
        },
    };
    if killed {
        format!("Restart initiated; {}", sync)
    } else {
        format!("Restart incomplete, processes not terminated; {}", sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthProbe;
    use crate::object_store::{MemoryObjectStore, ObjectStore};
    use crate::replication::{ReplicationConfig, ReplicationErrorKind, ReplicationScope};
    use crate::sandbox::{MockSandbox, ProcessStatus, Sandbox};
    use crate::wake::WakeConfig;

    fn tenant_with_config() -> (Arc<MockSandbox>, Tenant) {
        let sandbox = Arc::new(MockSandbox::new("acme"));
        sandbox.set_file("/root/.gateway/gateway.json", r#"{"gateway": {"port": 18789}}"#);
        sandbox.set_file("/root/.gateway/credentials/token.json", "secret");
        sandbox.set_file("/root/.gateway/sessions/s1.json", "{}");
        sandbox.set_file("/root/workspace/memory/today.md", "notes");
        let tenant = Tenant::new("acme", sandbox.clone());
        (sandbox, tenant)
    }

    fn coordinator(store: &MemoryObjectStore) -> ShutdownCoordinator {
        let store: Arc<dyn ObjectStore> = Arc::new(store.clone());
        let engine = Arc::new(ReplicationEngine::new(
            ReplicationConfig::default(),
            Some(store),
        ));
        ShutdownCoordinator::new(engine, ShutdownConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sync_after_critical() {
        let (_sandbox, tenant) = tenant_with_config();
        let store = MemoryObjectStore::new();

        let result = coordinator(&store)
            .sync_before_shutdown(&tenant, Duration::from_secs(45))
            .await;

        assert!(result.success);
        assert_eq!(result.outcome, SyncOutcome::Complete);
        assert_eq!(result.scope, ReplicationScope::Full);
        assert!(store.get("tenants/acme/.last-critical-sync").await.unwrap().is_some());
        assert!(store.get("tenants/acme/.last-sync").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_remaining_budget_skips_full_pass() {
        let (sandbox, tenant) = tenant_with_config();
        sandbox.set_command_delay("rsync", Duration::from_secs(8));
        let store = MemoryObjectStore::new();

        let result = coordinator(&store)
            .sync_before_shutdown(&tenant, Duration::from_secs(12))
            .await;

        assert!(result.success);
        assert_eq!(result.scope, ReplicationScope::Critical);
        assert_eq!(result.outcome, SyncOutcome::CriticalOnly);
        assert_eq!(sandbox.count_commands("rsync"), 1);
        assert!(store.get("tenants/acme/.last-sync").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_full_pass_is_partial() {
        let (_sandbox, tenant) = tenant_with_config();
        let store = MemoryObjectStore::new();
        store
            .corrupt_writes_to("tenants/acme/.last-sync", "someone-else|2025-01-01T00:00:00.000Z")
            .await;

        let result = coordinator(&store)
            .sync_before_shutdown(&tenant, Duration::from_secs(45))
            .await;

        assert!(result.success);
        assert_eq!(result.outcome, SyncOutcome::Partial);
        assert_eq!(result.scope, ReplicationScope::Critical);
        assert_eq!(result.error_kind(), Some(ReplicationErrorKind::Verification));
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_passes_failing_is_failed() {
        let sandbox = Arc::new(MockSandbox::new("acme"));
        let tenant = Tenant::new("acme", sandbox.clone());
        let store = MemoryObjectStore::new();

        let result = coordinator(&store)
            .sync_before_shutdown(&tenant, Duration::from_secs(45))
            .await;

        assert!(!result.success);
        assert_eq!(result.outcome, SyncOutcome::Failed);
        assert_eq!(
            result.error_kind(),
            Some(ReplicationErrorKind::SourceValidation)
        );
        assert_eq!(sandbox.count_commands("rsync"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_returns_before_rewake_finishes() {
        let (sandbox, tenant) = tenant_with_config();
        let old = sandbox.spawn_running("start-service.sh");
        let store = MemoryObjectStore::new();
        let wake = Arc::new(WakeController::with_config(
            WakeConfig::default(),
            HealthProbe::default(),
        ));
        let orchestrator = RestartOrchestrator::new(coordinator(&store), wake);

        sandbox.set_health_failures(3);
        let started = Instant::now();
        let handle = orchestrator.restart(&tenant).await;

        assert!(handle.response.success);
        assert!(handle.response.message.starts_with("Restart initiated"));
        assert_eq!(
            handle.response.sync_result.as_ref().unwrap().outcome,
            SyncOutcome::Complete
        );
        // Sync is instant here; only the settle delay elapses.
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!handle.rewake.is_finished());

        handle.rewake.await.unwrap();
        let processes = sandbox.list_processes().await.unwrap();
        let services: Vec<_> = processes
            .iter()
            .filter(|p| p.command == "start-service.sh")
            .collect();
        assert_eq!(services.len(), 2);
        assert!(services.iter().any(|p| p.id == old && p.status == ProcessStatus::Exited));
        assert!(services.iter().any(|p| p.status == ProcessStatus::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sandbox_restart_is_bounded() {
        let (sandbox, tenant) = tenant_with_config();
        sandbox.set_stalled(true);
        let store = MemoryObjectStore::new();
        let wake = Arc::new(WakeController::with_config(
            WakeConfig::default(),
            HealthProbe::default(),
        ));
        let orchestrator = RestartOrchestrator::new(coordinator(&store), wake);

        let started = Instant::now();
        let handle = orchestrator.restart(&tenant).await;

        // Both passes time out by 45s, then 10s kill bound and 2s settle.
        assert!(started.elapsed() >= Duration::from_secs(57));
        assert!(started.elapsed() < Duration::from_secs(58));
        assert!(!handle.response.success);
        let sync = handle.response.sync_result.as_ref().unwrap();
        assert_eq!(sync.outcome, SyncOutcome::Failed);
        assert_eq!(sync.error_kind(), Some(ReplicationErrorKind::Timeout));
        assert!(handle.response.message.starts_with("Restart incomplete"));
        handle.rewake.abort();
    }

    #[test]
    fn test_restart_message() {
        assert_eq!(
            restart_message(true, None),
            "Restart initiated; pre-restart sync timed out"
        );
        assert!(restart_message(false, None).starts_with("Restart incomplete"));
    }
}
