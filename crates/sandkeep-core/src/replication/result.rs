// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replication results and per-tenant history.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureClass;
use crate::object_store::ObjectStoreError;
use crate::sandbox::SandboxError;

/// Which pass produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationScope {
    /// Configuration and workspace trees, mirrored with deletion.
    Full,
    /// Critical subset of the configuration tree.
    Critical,
}

impl ReplicationScope {
    /// Name used in logs and marker metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationScope::Full => "full",
            ReplicationScope::Critical => "critical",
        }
    }
}

/// Why a replication attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReplicationErrorKind {
    /// Durable store not configured.
    Configuration,
    /// Another replication for the tenant is in progress.
    LockContention,
    /// Local state missing or structurally invalid. Nothing was copied.
    SourceValidation,
    /// Mirror tool exited with a code outside the accepted set.
    CopyExecution,
    /// Marker read-back did not match the id just written.
    Verification,
    /// The pass exceeded its time budget.
    Timeout,
    /// Transient sandbox or store condition.
    Container,
    /// Anything else.
    Internal,
}

impl ReplicationErrorKind {
    /// Retry class of the kind.
    pub fn class(&self) -> FailureClass {
        match self {
            ReplicationErrorKind::LockContention
            | ReplicationErrorKind::Timeout
            | ReplicationErrorKind::Container => FailureClass::Retryable,
            _ => FailureClass::Permanent,
        }
    }
}

/// Failure classification plus detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationFailure {
    /// Failure kind.
    pub kind: ReplicationErrorKind,
    /// Human-readable detail.
    pub detail: String,
}

impl ReplicationFailure {
    /// Build a failure.
    pub fn new(kind: ReplicationErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn sandbox(context: &str, err: &SandboxError) -> Self {
        let kind = match err {
            SandboxError::Timeout(_) => ReplicationErrorKind::Timeout,
            e if e.class().is_retryable() => ReplicationErrorKind::Container,
            _ => ReplicationErrorKind::Internal,
        };
        Self::new(kind, format!("{}: {}", context, err))
    }

    pub(crate) fn store(context: &str, err: &ObjectStoreError) -> Self {
        let kind = if err.class().is_retryable() {
            ReplicationErrorKind::Container
        } else {
            ReplicationErrorKind::Internal
        };
        Self::new(kind, format!("{}: {}", context, err))
    }
}

impl fmt::Display for ReplicationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Overall outcome, distinguishing partial progress from failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The full pass succeeded.
    Complete,
    /// Only the critical pass ran, and it succeeded.
    CriticalOnly,
    /// The critical pass succeeded but the full pass failed.
    Partial,
    /// Nothing was replicated.
    Failed,
}

/// Result of one replication attempt (or a merged shutdown sync).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationResult {
    /// Tenant id.
    pub tenant_id: String,
    /// True when the data this result covers is durable and verified.
    pub success: bool,
    /// Id generated for this attempt.
    pub replication_id: String,
    /// Pass that produced the result.
    pub scope: ReplicationScope,
    /// Overall outcome.
    pub outcome: SyncOutcome,
    /// Failure, if any. A `partial` result carries the full pass's failure.
    pub error: Option<ReplicationFailure>,
    /// Files covered by the pass.
    pub file_count: u64,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Mirror tool exit code, if the tool ran.
    pub exit_code: Option<i32>,
    /// Time of the last verified marker write for this scope.
    pub last_marker_at: Option<DateTime<Utc>>,
    /// When the attempt finished.
    pub completed_at: DateTime<Utc>,
}

impl ReplicationResult {
    /// Failure kind, if any.
    pub fn error_kind(&self) -> Option<ReplicationErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Bounded per-tenant ring buffer of recent results.
pub struct ReplicationHistory {
    capacity: usize,
    entries: Mutex<HashMap<String, VecDeque<ReplicationResult>>>,
}

impl ReplicationHistory {
    /// Keep the last `capacity` results per tenant.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, VecDeque<ReplicationResult>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a result, evicting the oldest when full.
    pub fn record(&self, result: ReplicationResult) {
        let mut entries = self.entries();
        let buffer = entries.entry(result.tenant_id.clone()).or_default();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(result);
    }

    /// Results for `tenant_id`, oldest first.
    pub fn list(&self, tenant_id: &str) -> Vec<ReplicationResult> {
        self.entries()
            .get(tenant_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent result for `tenant_id`.
    pub fn last(&self, tenant_id: &str) -> Option<ReplicationResult> {
        self.entries()
            .get(tenant_id)
            .and_then(|buffer| buffer.back().cloned())
    }

    /// Most recent verified marker time for `tenant_id` in `scope`.
    pub fn last_marker_at(&self, tenant_id: &str, scope: ReplicationScope) -> Option<DateTime<Utc>> {
        self.entries().get(tenant_id).and_then(|buffer| {
            buffer
                .iter()
                .rev()
                .filter(|r| r.scope == scope && r.success)
                .find_map(|r| r.last_marker_at)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(tenant: &str, id: &str, success: bool) -> ReplicationResult {
        ReplicationResult {
            tenant_id: tenant.to_string(),
            success,
            replication_id: id.to_string(),
            scope: ReplicationScope::Full,
            outcome: if success {
                SyncOutcome::Complete
            } else {
                SyncOutcome::Failed
            },
            error: None,
            file_count: 0,
            duration_ms: 0,
            exit_code: None,
            last_marker_at: success.then(Utc::now),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let history = ReplicationHistory::new(3);
        for i in 0..5 {
            history.record(result("t", &format!("r{}", i), true));
        }
        history.record(result("other", "x", true));

        let ids: Vec<String> = history
            .list("t")
            .into_iter()
            .map(|r| r.replication_id)
            .collect();
        assert_eq!(ids, vec!["r2", "r3", "r4"]);
        assert_eq!(history.last("t").unwrap().replication_id, "r4");
        assert_eq!(history.list("other").len(), 1);
        assert!(history.last("missing").is_none());
    }

    #[test]
    fn test_last_marker_skips_failures() {
        let history = ReplicationHistory::new(10);
        let ok = result("t", "ok", true);
        let marker_at = ok.last_marker_at;
        history.record(ok);
        history.record(result("t", "bad", false));

        assert_eq!(history.last_marker_at("t", ReplicationScope::Full), marker_at);
        assert_eq!(history.last_marker_at("t", ReplicationScope::Critical), None);
    }

    #[test]
    fn test_failure_kinds_classify() {
        assert!(ReplicationErrorKind::LockContention.class().is_retryable());
        assert!(!ReplicationErrorKind::Verification.class().is_retryable());

        let timeout = ReplicationFailure::sandbox(
            "mirror config",
            &SandboxError::Timeout(Duration::from_secs(5)),
        );
        assert_eq!(timeout.kind, ReplicationErrorKind::Timeout);

        let hibernating = ReplicationFailure::sandbox("list", &SandboxError::Hibernating);
        assert_eq!(hibernating.kind, ReplicationErrorKind::Container);
        assert!(hibernating.to_string().contains("hibernating"));
    }
}
