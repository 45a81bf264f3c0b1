// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandbox boundary.
//!
//! A [`Sandbox`] is the handle to one tenant's compute unit. The core only
//! consumes it: process control, logs, port readiness and file I/O. Sandboxes
//! are owned by external infrastructure.

pub mod mock;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FailureClass;

pub use mock::{MockOp, MockSandbox};

/// Errors from sandbox operations.
///
/// Each variant is raised at the failure site with its class already decided;
/// see [`SandboxError::class`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// The sandbox is asleep and must be woken before it can serve calls.
    #[error("Sandbox is hibernating")]
    Hibernating,

    /// The operation did not finish within its bound.
    #[error("Sandbox operation timed out after {0:?}")]
    Timeout(Duration),

    /// The sandbox (or a port inside it) refused the connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Process, file or sandbox was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The sandbox control plane is temporarily unavailable.
    #[error("Sandbox unavailable: {0}")]
    Unavailable(String),

    /// The process could not be started.
    #[error("Process start failed: {0}")]
    StartFailed(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

impl SandboxError {
    /// Retryable for transient container conditions, permanent otherwise.
    pub fn class(&self) -> FailureClass {
        match self {
            SandboxError::Hibernating
            | SandboxError::Timeout(_)
            | SandboxError::ConnectionRefused(_)
            | SandboxError::NotFound(_)
            | SandboxError::Unavailable(_) => FailureClass::Retryable,
            SandboxError::Io(e) => match e.kind() {
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::NotFound
                | std::io::ErrorKind::BrokenPipe => FailureClass::Retryable,
                _ => FailureClass::Permanent,
            },
            SandboxError::StartFailed(_) | SandboxError::Other(_) => FailureClass::Permanent,
        }
    }
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Process lifecycle as reported by the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Spawned but not yet confirmed running.
    Starting,
    /// Running.
    Running,
    /// Finished (see `exit_code`).
    Exited,
}

/// A process inside a sandbox. Read from the sandbox, not owned by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Sandbox-scoped process identifier.
    pub id: String,
    /// The command line the process was started with.
    pub command: String,
    /// Current status.
    pub status: ProcessStatus,
    /// Exit code once exited.
    pub exit_code: Option<i32>,
}

impl ProcessInfo {
    /// True unless the process has exited.
    pub fn is_alive(&self) -> bool {
        self.status != ProcessStatus::Exited
    }
}

/// Captured output of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLogs {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Handle to one tenant's compute unit.
///
/// Every method is a suspension point; implementations must not block the
/// executor.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Identifier of the sandbox (usually the tenant id).
    fn sandbox_id(&self) -> &str;

    /// List processes known to the sandbox.
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>>;

    /// Start a process with the given environment.
    async fn start_process(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<ProcessInfo>;

    /// Terminate a process.
    async fn kill_process(&self, process_id: &str) -> Result<()>;

    /// Wait for a process to exit, failing with [`SandboxError::Timeout`].
    async fn wait_for_exit(&self, process_id: &str, timeout: Duration) -> Result<ProcessInfo>;

    /// Captured stdout/stderr of a process.
    async fn get_logs(&self, process_id: &str) -> Result<ProcessLogs>;

    /// Wait until something listens on `port`.
    async fn wait_for_port(&self, port: u16, timeout: Duration) -> Result<()>;

    /// Read a file as UTF-8. Missing files yield [`SandboxError::NotFound`].
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Write (create or replace) a file.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Create a directory and its parents.
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Delete a file.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Whether a file or directory exists.
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Output of a command run to completion with [`exec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code (`-1` when the sandbox did not report one).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// Exit code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command to completion under `timeout`.
///
/// On timeout the process gets a best-effort kill and the call fails with
/// [`SandboxError::Timeout`]. There is no further preemption.
pub async fn exec(sandbox: &dyn Sandbox, command: &str, timeout: Duration) -> Result<ExecOutput> {
    let deadline = Instant::now() + timeout;

    let process = tokio::time::timeout(timeout, sandbox.start_process(command, &HashMap::new()))
        .await
        .map_err(|_| SandboxError::Timeout(timeout))??;

    let remaining = deadline.saturating_duration_since(Instant::now());
    let finished = match sandbox.wait_for_exit(&process.id, remaining).await {
        Ok(info) => info,
        Err(e) => {
            if matches!(e, SandboxError::Timeout(_)) {
                warn!(
                    sandbox_id = %sandbox.sandbox_id(),
                    process_id = %process.id,
                    command = %command,
                    "Command timed out, killing process"
                );
                if let Err(kill_error) = sandbox.kill_process(&process.id).await {
                    warn!(
                        sandbox_id = %sandbox.sandbox_id(),
                        process_id = %process.id,
                        error = %kill_error,
                        "Failed to kill timed-out command"
                    );
                }
                return Err(SandboxError::Timeout(timeout));
            }
            return Err(e);
        }
    };

    let logs = match sandbox.get_logs(&process.id).await {
        Ok(logs) => logs,
        Err(e) => {
            debug!(process_id = %process.id, error = %e, "Could not read process logs");
            ProcessLogs::default()
        }
    };

    Ok(ExecOutput {
        exit_code: finished.exit_code.unwrap_or(-1),
        stdout: logs.stdout,
        stderr: logs.stderr,
    })
}

/// Outcome of [`kill_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillSummary {
    /// Processes successfully signalled.
    pub killed: usize,
    /// Processes whose kill failed (tolerated).
    pub failed: usize,
}

/// Best-effort kill of every live process in the sandbox.
///
/// Individual kill failures are logged and counted, never returned. Only a
/// failure to list processes is an error.
pub async fn kill_all(sandbox: &dyn Sandbox) -> Result<KillSummary> {
    let processes = sandbox.list_processes().await?;
    let mut summary = KillSummary::default();

    for process in processes.iter().filter(|p| p.is_alive()) {
        match sandbox.kill_process(&process.id).await {
            Ok(()) => summary.killed += 1,
            Err(e) => {
                warn!(
                    sandbox_id = %sandbox.sandbox_id(),
                    process_id = %process.id,
                    error = %e,
                    "Failed to kill process, continuing"
                );
                summary.failed += 1;
            }
        }
    }

    debug!(
        sandbox_id = %sandbox.sandbox_id(),
        killed = summary.killed,
        failed = summary.failed,
        "Killed sandbox processes"
    );

    Ok(summary)
}
