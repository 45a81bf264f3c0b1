// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replication engine.
//!
//! Mirrors a tenant's configuration and workspace trees from its sandbox into
//! the durable mount, then writes a marker object to the durable store and
//! reads it back. A pass only counts as successful once the marker read-back
//! matches the id generated for that pass.
//!
//! Two passes exist:
//!
//! - **full** ([`ReplicationEngine::replicate_all`]): both trees, mirrored
//!   with deletion, marker at `{prefix}/.last-sync`.
//! - **critical** ([`ReplicationEngine::replicate_critical`]): only files for
//!   which [`is_critical_path`] holds, copied without deletion under a
//!   shorter budget, marker at `{prefix}/.last-critical-sync`.
//!
//! Both passes share one per-tenant slot in the replication
//! [`SingleFlight`] registry; a second call while a slot is live returns
//! [`ReplicationErrorKind::LockContention`] without copying anything.
//!
//! Every failure is folded into a [`ReplicationResult`]; these methods never
//! return `Err`.

mod commands;
pub mod marker;
pub mod priority;
pub mod result;
mod validate;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::object_store::ObjectStore;
use crate::sandbox::{self, ExecOutput, Sandbox};
use crate::single_flight::{Acquire, SingleFlight};
use crate::tenant::Tenant;

pub use marker::{Marker, MarkerParseError};
pub use priority::{
    DEFAULT_PRIORITY, PATH_PRIORITIES, PathPattern, get_path_priority, is_critical_path,
};
pub use result::{
    ReplicationErrorKind, ReplicationFailure, ReplicationHistory, ReplicationResult,
    ReplicationScope, SyncOutcome,
};

/// Replication layout and limits.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Tenant configuration tree inside the sandbox.
    pub config_dir: String,
    /// Primary config filename, relative to `config_dir`.
    pub primary_config: String,
    /// At least one of these must be a top-level key of the primary config.
    pub required_sections: Vec<String>,
    /// Tenant workspace tree inside the sandbox. Skipped if absent.
    pub workspace_dir: String,
    /// Where the durable store is mounted inside the sandbox.
    pub durable_mount: String,
    /// Key prefix under which tenants live (`{tenant_prefix}/{tenant_id}`).
    pub tenant_prefix: String,
    /// File patterns never mirrored.
    pub excludes: Vec<String>,
    /// Directory for the critical pass's temporary file list.
    pub scratch_dir: String,
    /// Budget of a full pass. Every pass budget is capped at the
    /// registry's hold limit, 90% of `registry_ttl`.
    pub full_timeout: Duration,
    /// Budget of a critical pass.
    pub critical_timeout: Duration,
    /// Age after which an unreleased replication slot is reclaimable.
    pub registry_ttl: Duration,
    /// Results kept per tenant.
    pub history_capacity: usize,
    /// Mirror tool exit code meaning "some source files vanished during
    /// the copy". Accepted as success.
    pub vanished_exit_code: i32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            config_dir: "/root/.gateway".to_string(),
            primary_config: priority::PRIMARY_CONFIG_FILE.to_string(),
            required_sections: vec![
                "agents".to_string(),
                "gateway".to_string(),
                "channels".to_string(),
            ],
            workspace_dir: "/root/workspace".to_string(),
            durable_mount: "/data/durable".to_string(),
            tenant_prefix: "tenants".to_string(),
            excludes: vec!["*.lock".to_string(), "*.log".to_string(), "*.tmp".to_string()],
            scratch_dir: "/tmp".to_string(),
            full_timeout: Duration::from_secs(50),
            critical_timeout: Duration::from_secs(15),
            registry_ttl: Duration::from_secs(60),
            history_capacity: 10,
            vanished_exit_code: 24,
        }
    }
}

impl ReplicationConfig {
    /// Full path of the primary config.
    pub fn primary_config_path(&self) -> String {
        format!(
            "{}/{}",
            self.config_dir.trim_end_matches('/'),
            self.primary_config
        )
    }

    /// Durable store key prefix for a tenant.
    pub fn tenant_key(&self, tenant_id: &str) -> String {
        format!("{}/{}", self.tenant_prefix.trim_end_matches('/'), tenant_id)
    }

    /// Tenant directory under the durable mount.
    pub fn durable_dir(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}",
            self.durable_mount.trim_end_matches('/'),
            self.tenant_key(tenant_id)
        )
    }

    /// Marker key for a tenant and pass.
    pub fn marker_key(&self, tenant_id: &str, scope: ReplicationScope) -> String {
        let name = match scope {
            ReplicationScope::Full => ".last-sync",
            ReplicationScope::Critical => ".last-critical-sync",
        };
        format!("{}/{}", self.tenant_key(tenant_id), name)
    }
}

/// What started a replication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationTrigger {
    /// Explicit request.
    #[default]
    Manual,
    /// Periodic scheduler.
    Scheduled,
    /// Pre-shutdown sync.
    Shutdown,
}

impl ReplicationTrigger {
    /// Name used in logs and marker metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationTrigger::Manual => "manual",
            ReplicationTrigger::Scheduled => "scheduled",
            ReplicationTrigger::Shutdown => "shutdown",
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicationOptions {
    /// Overrides the pass's configured budget.
    pub timeout: Option<Duration>,
    /// Recorded in logs and marker metadata.
    pub trigger: ReplicationTrigger,
}

impl ReplicationOptions {
    /// Options for `trigger` with the configured budget.
    pub fn triggered_by(trigger: ReplicationTrigger) -> Self {
        Self {
            timeout: None,
            trigger,
        }
    }

    /// Override the budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// State of one pass while it runs.
struct Attempt {
    tenant_id: String,
    replication_id: String,
    scope: ReplicationScope,
    started: Instant,
    deadline: Instant,
    exit_code: Option<i32>,
    file_count: u64,
}

impl Attempt {
    fn new(tenant_id: &str, scope: ReplicationScope, budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            tenant_id: tenant_id.to_string(),
            replication_id: Uuid::new_v4().to_string(),
            scope,
            started,
            deadline: started + budget,
            exit_code: None,
            file_count: 0,
        }
    }

    fn remaining(&self) -> Result<Duration, ReplicationFailure> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            Err(ReplicationFailure::new(
                ReplicationErrorKind::Timeout,
                format!("{} replication budget exhausted", self.scope.as_str()),
            ))
        } else {
            Ok(remaining)
        }
    }

    /// Keep the first non-zero exit code seen.
    fn record_exit(&mut self, code: i32) {
        self.exit_code = Some(match self.exit_code {
            Some(previous) if previous != 0 => previous,
            _ => code,
        });
    }
}

/// Priority-aware, lock-protected, verified mirroring of tenant state.
pub struct ReplicationEngine {
    config: ReplicationConfig,
    store: Option<Arc<dyn ObjectStore>>,
    locks: SingleFlight<ReplicationResult>,
    history: ReplicationHistory,
}

impl ReplicationEngine {
    /// Create an engine with its own replication registry. Without a store
    /// every pass fails with [`ReplicationErrorKind::Configuration`].
    pub fn new(config: ReplicationConfig, store: Option<Arc<dyn ObjectStore>>) -> Self {
        let locks = SingleFlight::new("replication", config.registry_ttl, Duration::ZERO);
        Self::with_locks(config, store, locks)
    }

    /// Create an engine sharing an existing replication registry.
    pub fn with_locks(
        config: ReplicationConfig,
        store: Option<Arc<dyn ObjectStore>>,
        locks: SingleFlight<ReplicationResult>,
    ) -> Self {
        let limit = locks.hold_limit();
        if config.full_timeout > limit || config.critical_timeout > limit {
            warn!(
                full_timeout_secs = config.full_timeout.as_secs(),
                critical_timeout_secs = config.critical_timeout.as_secs(),
                registry_ttl_secs = locks.ttl().as_secs(),
                limit_secs = limit.as_secs(),
                "Replication budgets exceed the slot TTL and will be capped"
            );
        }
        let history = ReplicationHistory::new(config.history_capacity);
        Self {
            config,
            store,
            locks,
            history,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// The replication registry.
    pub fn locks(&self) -> &SingleFlight<ReplicationResult> {
        &self.locks
    }

    /// Recent results for a tenant, oldest first.
    pub fn history(&self, tenant_id: &str) -> Vec<ReplicationResult> {
        self.history.list(tenant_id)
    }

    /// Most recent result for a tenant.
    pub fn last_result(&self, tenant_id: &str) -> Option<ReplicationResult> {
        self.history.last(tenant_id)
    }

    /// Mirror the configuration and workspace trees.
    #[instrument(skip(self, tenant, opts), fields(tenant_id = %tenant.id, trigger = opts.trigger.as_str()))]
    pub async fn replicate_all(&self, tenant: &Tenant, opts: ReplicationOptions) -> ReplicationResult {
        let budget = opts.timeout.unwrap_or(self.config.full_timeout);
        self.run(tenant, ReplicationScope::Full, budget, opts.trigger)
            .await
    }

    /// Copy only the critical subset of the configuration tree.
    #[instrument(skip(self, tenant, opts), fields(tenant_id = %tenant.id, trigger = opts.trigger.as_str()))]
    pub async fn replicate_critical(
        &self,
        tenant: &Tenant,
        opts: ReplicationOptions,
    ) -> ReplicationResult {
        let budget = opts.timeout.unwrap_or(self.config.critical_timeout);
        self.run(tenant, ReplicationScope::Critical, budget, opts.trigger)
            .await
    }

    async fn run(
        &self,
        tenant: &Tenant,
        scope: ReplicationScope,
        budget: Duration,
        trigger: ReplicationTrigger,
    ) -> ReplicationResult {
        // A pass must release its slot before the slot can be reclaimed.
        let budget = budget.min(self.locks.hold_limit());
        let mut attempt = Attempt::new(&tenant.id, scope, budget);
        debug!(
            replication_id = %attempt.replication_id,
            scope = scope.as_str(),
            budget_ms = budget.as_millis() as u64,
            "Starting replication"
        );

        let Some(store) = self.store.as_deref() else {
            let failure = ReplicationFailure::new(
                ReplicationErrorKind::Configuration,
                "durable store not configured",
            );
            return self.finish(attempt, Err(failure));
        };

        let permit = match self.locks.acquire(&tenant.id) {
            Acquire::New(permit) => permit,
            Acquire::InFlight(held) => {
                let failure = ReplicationFailure::new(
                    ReplicationErrorKind::LockContention,
                    format!(
                        "replication already in progress for {} (held for {:?})",
                        tenant.id,
                        held.held_for()
                    ),
                );
                return self.finish(attempt, Err(failure));
            }
        };

        let outcome = match tokio::time::timeout(
            budget,
            self.execute(tenant, store, &mut attempt, trigger),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ReplicationFailure::new(
                ReplicationErrorKind::Timeout,
                format!("{} replication exceeded {:?}", scope.as_str(), budget),
            )),
        };

        let result = self.finish(attempt, outcome);
        permit.complete(result.clone());
        result
    }

    async fn execute(
        &self,
        tenant: &Tenant,
        store: &dyn ObjectStore,
        attempt: &mut Attempt,
        trigger: ReplicationTrigger,
    ) -> Result<DateTime<Utc>, ReplicationFailure> {
        let sandbox = tenant.sandbox.as_ref();

        validate::validate_primary_config(
            sandbox,
            &self.config.primary_config_path(),
            &self.config.required_sections,
        )
        .await?;
        self.ensure_no_running_mirror(sandbox, &tenant.id).await?;

        match attempt.scope {
            ReplicationScope::Full => self.copy_full(sandbox, attempt).await?,
            ReplicationScope::Critical => self.copy_critical(sandbox, attempt).await?,
        }

        self.write_verified_marker(store, attempt, trigger).await
    }

    /// Secondary pileup guard: a mirror left running by an earlier pass
    /// (or another instance) still writes into the tenant's prefix.
    async fn ensure_no_running_mirror(
        &self,
        sandbox: &dyn Sandbox,
        tenant_id: &str,
    ) -> Result<(), ReplicationFailure> {
        let prefix = format!("{}/", self.config.durable_dir(tenant_id));
        let processes = sandbox
            .list_processes()
            .await
            .map_err(|e| ReplicationFailure::sandbox("list processes", &e))?;

        match processes.iter().find(|p| commands::is_mirror_into(p, &prefix)) {
            Some(running) => Err(ReplicationFailure::new(
                ReplicationErrorKind::LockContention,
                format!("mirror process {} is still running", running.id),
            )),
            None => Ok(()),
        }
    }

    async fn copy_full(
        &self,
        sandbox: &dyn Sandbox,
        attempt: &mut Attempt,
    ) -> Result<(), ReplicationFailure> {
        let dest = self.config.durable_dir(&attempt.tenant_id);
        let config_dest = format!("{}/config", dest);
        let workspace_dest = format!("{}/workspace", dest);
        let destinations = [config_dest.as_str(), workspace_dest.as_str()];

        let before = self.count_files(sandbox, &destinations, attempt).await;
        debug!(files_before = before, "Counted durable files");

        self.mirror_tree(sandbox, &self.config.config_dir, &config_dest, attempt)
            .await?;

        let has_workspace = sandbox
            .exists(&self.config.workspace_dir)
            .await
            .map_err(|e| ReplicationFailure::sandbox("check workspace", &e))?;
        if has_workspace {
            self.mirror_tree(sandbox, &self.config.workspace_dir, &workspace_dest, attempt)
                .await?;
        } else {
            debug!(workspace_dir = %self.config.workspace_dir, "No workspace tree, skipping");
        }

        attempt.file_count = self.count_files(sandbox, &destinations, attempt).await;
        Ok(())
    }

    async fn copy_critical(
        &self,
        sandbox: &dyn Sandbox,
        attempt: &mut Attempt,
    ) -> Result<(), ReplicationFailure> {
        let config_dir = self.config.config_dir.trim_end_matches('/');
        let listing = sandbox::exec(sandbox, &commands::list_files(config_dir), attempt.remaining()?)
            .await
            .map_err(|e| ReplicationFailure::sandbox("list configuration files", &e))?;
        if !listing.success() {
            return Err(ReplicationFailure::new(
                ReplicationErrorKind::CopyExecution,
                format!(
                    "listing {} exited with {}: {}",
                    config_dir,
                    listing.exit_code,
                    listing.stderr.trim()
                ),
            ));
        }

        let prefix = format!("{}/", config_dir);
        let mut by_priority: BTreeMap<u32, usize> = BTreeMap::new();
        let mut critical = Vec::new();
        for relative in listing
            .stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix(&prefix))
        {
            *by_priority.entry(get_path_priority(relative)).or_default() += 1;
            if is_critical_path(relative) {
                critical.push(relative.to_string());
            }
        }
        debug!(
            by_priority = ?by_priority,
            critical = critical.len(),
            "Classified configuration files"
        );

        let list_path = format!(
            "{}/sandkeep-critical-{}.txt",
            self.config.scratch_dir.trim_end_matches('/'),
            attempt.tenant_id
        );
        sandbox
            .write_file(&list_path, &critical.join("\n"))
            .await
            .map_err(|e| ReplicationFailure::sandbox("write critical file list", &e))?;

        let dest = format!("{}/config", self.config.durable_dir(&attempt.tenant_id));
        let copied = self
            .copy_listed(sandbox, config_dir, &dest, &list_path, attempt)
            .await;

        if let Err(e) = sandbox.delete_file(&list_path).await {
            debug!(path = %list_path, error = %e, "Could not remove critical file list");
        }

        copied?;
        attempt.file_count = critical.len() as u64;
        Ok(())
    }

    async fn copy_listed(
        &self,
        sandbox: &dyn Sandbox,
        src: &str,
        dest: &str,
        list_path: &str,
        attempt: &mut Attempt,
    ) -> Result<(), ReplicationFailure> {
        sandbox
            .mkdir(dest)
            .await
            .map_err(|e| ReplicationFailure::sandbox("create durable directory", &e))?;
        let command = commands::mirror_subset(src, dest, list_path);
        let output = sandbox::exec(sandbox, &command, attempt.remaining()?)
            .await
            .map_err(|e| ReplicationFailure::sandbox("copy critical files", &e))?;
        attempt.record_exit(output.exit_code);
        self.check_exit(src, &output)
    }

    async fn mirror_tree(
        &self,
        sandbox: &dyn Sandbox,
        src: &str,
        dest: &str,
        attempt: &mut Attempt,
    ) -> Result<(), ReplicationFailure> {
        sandbox
            .mkdir(dest)
            .await
            .map_err(|e| ReplicationFailure::sandbox("create durable directory", &e))?;
        let command = commands::mirror(src, dest, &self.config.excludes);
        let output = sandbox::exec(sandbox, &command, attempt.remaining()?)
            .await
            .map_err(|e| ReplicationFailure::sandbox(&format!("mirror {}", src), &e))?;
        attempt.record_exit(output.exit_code);
        self.check_exit(src, &output)
    }

    fn check_exit(&self, src: &str, output: &ExecOutput) -> Result<(), ReplicationFailure> {
        if output.success() {
            return Ok(());
        }
        if output.exit_code == self.config.vanished_exit_code {
            warn!(
                src = %src,
                exit_code = output.exit_code,
                "Some source files vanished during copy, accepting"
            );
            return Ok(());
        }
        Err(ReplicationFailure::new(
            ReplicationErrorKind::CopyExecution,
            format!(
                "copy of {} exited with {}: {}",
                src,
                output.exit_code,
                output.stderr.trim()
            ),
        ))
    }

    /// Sum of file counts under `dirs`. Counting is diagnostic only, so
    /// failures are logged and count as zero.
    async fn count_files(&self, sandbox: &dyn Sandbox, dirs: &[&str], attempt: &Attempt) -> u64 {
        let mut total = 0;
        for dir in dirs {
            let Ok(remaining) = attempt.remaining() else {
                break;
            };
            match sandbox::exec(sandbox, &commands::count_files(dir), remaining).await {
                Ok(output) => total += output.stdout.trim().parse::<u64>().unwrap_or(0),
                Err(e) => debug!(dir = %dir, error = %e, "Could not count files"),
            }
        }
        total
    }

    async fn write_verified_marker(
        &self,
        store: &dyn ObjectStore,
        attempt: &Attempt,
        trigger: ReplicationTrigger,
    ) -> Result<DateTime<Utc>, ReplicationFailure> {
        let key = self.config.marker_key(&attempt.tenant_id, attempt.scope);
        let marker = Marker::new(attempt.replication_id.clone(), Utc::now());
        let metadata = HashMap::from([
            ("replication-id".to_string(), attempt.replication_id.clone()),
            ("scope".to_string(), attempt.scope.as_str().to_string()),
            ("trigger".to_string(), trigger.as_str().to_string()),
        ]);

        store
            .put(&key, marker.encode().into_bytes(), metadata)
            .await
            .map_err(|e| ReplicationFailure::store("write marker", &e))?;

        let stored = store
            .get(&key)
            .await
            .map_err(|e| ReplicationFailure::store("read back marker", &e))?
            .ok_or_else(|| {
                ReplicationFailure::new(
                    ReplicationErrorKind::Verification,
                    format!("marker {} missing after write", key),
                )
            })?;

        let read = Marker::parse(&stored.text()).map_err(|e| {
            ReplicationFailure::new(
                ReplicationErrorKind::Verification,
                format!("marker {} unreadable: {}", key, e),
            )
        })?;

        if read.replication_id != attempt.replication_id {
            return Err(ReplicationFailure::new(
                ReplicationErrorKind::Verification,
                format!(
                    "marker {} holds replication id {}, expected {}",
                    key, read.replication_id, attempt.replication_id
                ),
            ));
        }

        Ok(read.written_at)
    }

    fn finish(
        &self,
        attempt: Attempt,
        outcome: Result<DateTime<Utc>, ReplicationFailure>,
    ) -> ReplicationResult {
        let duration_ms = attempt.started.elapsed().as_millis() as u64;
        let (success, error, last_marker_at) = match outcome {
            Ok(written_at) => (true, None, Some(written_at)),
            Err(failure) => (
                false,
                Some(failure),
                self.history
                    .last_marker_at(&attempt.tenant_id, attempt.scope),
            ),
        };
        let outcome = match (success, attempt.scope) {
            (true, ReplicationScope::Full) => SyncOutcome::Complete,
            (true, ReplicationScope::Critical) => SyncOutcome::CriticalOnly,
            (false, _) => SyncOutcome::Failed,
        };

        let result = ReplicationResult {
            tenant_id: attempt.tenant_id,
            success,
            replication_id: attempt.replication_id,
            scope: attempt.scope,
            outcome,
            error,
            file_count: attempt.file_count,
            duration_ms,
            exit_code: attempt.exit_code,
            last_marker_at,
            completed_at: Utc::now(),
        };

        match &result.error {
            None => info!(
                replication_id = %result.replication_id,
                scope = result.scope.as_str(),
                file_count = result.file_count,
                duration_ms = result.duration_ms,
                exit_code = ?result.exit_code,
                "Replication completed"
            ),
            Some(failure) if failure.kind == ReplicationErrorKind::SourceValidation => error!(
                replication_id = %result.replication_id,
                scope = result.scope.as_str(),
                detail = %failure.detail,
                "Source validation failed, existing backup left untouched"
            ),
            Some(failure) => warn!(
                replication_id = %result.replication_id,
                scope = result.scope.as_str(),
                kind = ?failure.kind,
                detail = %failure.detail,
                exit_code = ?result.exit_code,
                "Replication failed"
            ),
        }

        self.history.record(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use crate::sandbox::MockSandbox;

    #[test]
    fn test_layout_keys() {
        let config = ReplicationConfig::default();
        assert_eq!(config.primary_config_path(), "/root/.gateway/gateway.json");
        assert_eq!(config.durable_dir("acme"), "/data/durable/tenants/acme");
        assert_eq!(
            config.marker_key("acme", ReplicationScope::Full),
            "tenants/acme/.last-sync"
        );
        assert_eq!(
            config.marker_key("acme", ReplicationScope::Critical),
            "tenants/acme/.last-critical-sync"
        );
    }

    #[tokio::test]
    async fn test_missing_store_is_configuration_error() {
        let sandbox = Arc::new(MockSandbox::new("acme"));
        sandbox.set_file("/root/.gateway/gateway.json", r#"{"gateway": {}}"#);
        let engine = ReplicationEngine::new(ReplicationConfig::default(), None);

        let result = engine
            .replicate_all(&Tenant::new("acme", sandbox.clone()), ReplicationOptions::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ReplicationErrorKind::Configuration));
        assert_eq!(sandbox.count_commands("rsync"), 0);
        assert!(!engine.locks().is_held("acme"));
        assert_eq!(engine.last_result("acme"), Some(result));
    }

    #[tokio::test]
    async fn test_exit_code_keeps_first_failure() {
        let mut attempt = Attempt::new("t", ReplicationScope::Full, Duration::from_secs(1));
        attempt.record_exit(0);
        attempt.record_exit(24);
        attempt.record_exit(0);
        assert_eq!(attempt.exit_code, Some(24));

        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let engine = ReplicationEngine::new(ReplicationConfig::default(), Some(store));
        let output = ExecOutput {
            exit_code: 24,
            stdout: String::new(),
            stderr: "file has vanished".into(),
        };
        assert!(engine.check_exit("/root/.gateway", &output).is_ok());

        let output = ExecOutput {
            exit_code: 23,
            stdout: String::new(),
            stderr: "partial transfer".into(),
        };
        let failure = engine.check_exit("/root/.gateway", &output).unwrap_err();
        assert_eq!(failure.kind, ReplicationErrorKind::CopyExecution);
        assert!(failure.detail.contains("partial transfer"));
    }
}
