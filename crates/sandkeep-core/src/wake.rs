// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wake controller.
//!
//! Brings a tenant's sandbox from an unknown (possibly hibernating) state to a
//! health-verified ready state within a bounded time.
//!
//! ```text
//!  Unknown ──► Checking ──┬──────────────► HealthVerifying ──► Ready
//!                         │                      │ probe fails
//!                         ▼                      ▼
//!                     NeedsWake ◄────────────────┘
//!                         │ kill all, settle, start service
//!                         ▼
//!                      Waking ──► HealthVerifying (poll) ──► Ready
//!                                        │ deadline exceeded
//!                                        ▼
//!                                     Failed
//! ```
//!
//! Concurrent `ensure_ready` calls for one tenant share a single attempt
//! through the wake [`SingleFlight`] registry.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, FailureClass, Result};
use crate::health::HealthProbe;
use crate::retry::RetryPolicy;
use crate::sandbox::{self, ProcessInfo, ProcessStatus, SandboxError};
use crate::single_flight::{Acquire, FlightAbandoned, SingleFlight};
use crate::tenant::Tenant;

/// The long-running process a sandbox hosts.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Command that starts the service. Also used to recognise it in the
    /// process list.
    pub command: String,
    /// Port the service listens on once ready, if readiness should include it.
    pub port: Option<u16>,
    /// Extra environment for the service process.
    pub env: HashMap<String, String>,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            command: "start-service.sh".to_string(),
            port: None,
            env: HashMap::new(),
        }
    }
}

/// Wake controller configuration.
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Service to run inside each sandbox.
    pub service: ServiceSpec,
    /// Interval between readiness polls.
    pub poll_interval: Duration,
    /// Budget used when the caller does not pass one (retry loops).
    pub default_max_wait: Duration,
    /// Pause between killing old processes and starting the service.
    pub settle_delay: Duration,
    /// Age after which an unreleased wake slot is reclaimable.
    pub registry_ttl: Duration,
    /// How long a finished wake outcome is served to new callers.
    pub cooldown: Duration,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            service: ServiceSpec::default(),
            poll_interval: Duration::from_secs(2),
            default_max_wait: Duration::from_secs(180),
            settle_delay: Duration::from_secs(1),
            registry_ttl: Duration::from_secs(300),
            cooldown: Duration::from_secs(1),
        }
    }
}

/// States of one wake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeState {
    /// Nothing observed yet.
    Unknown,
    /// Listing processes.
    Checking,
    /// The service must be (re)started.
    NeedsWake,
    /// Old processes killed, service being started.
    Waking,
    /// Running the health probe.
    HealthVerifying,
    /// Health verified.
    Ready,
    /// Gave up.
    Failed,
}

/// Successful outcome of [`WakeController::ensure_ready`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeReport {
    /// Tenant the report is for.
    pub tenant_id: String,
    /// Every state the attempt passed through, in order.
    pub transitions: Vec<WakeState>,
    /// True if the service had to be started.
    pub woke: bool,
    /// True if this caller attached to another caller's attempt.
    pub shared: bool,
    /// Wall time of the attempt in milliseconds.
    pub elapsed_ms: u64,
}

/// Wake failures. `Clone` so one outcome can be shared by every attached
/// caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum WakeError {
    /// Deadline exceeded while polling for readiness.
    #[error(
        "Sandbox for tenant {tenant_id} not ready after {waited:?} (last error: {})",
        .last_error.as_deref().unwrap_or("none")
    )]
    Timeout {
        /// Tenant id.
        tenant_id: String,
        /// How long the caller waited.
        waited: Duration,
        /// Last error observed while polling.
        last_error: Option<String>,
    },

    /// A sandbox call on the wake path failed.
    #[error("Sandbox {operation} failed for tenant {tenant_id}: {message}")]
    Sandbox {
        /// Tenant id.
        tenant_id: String,
        /// Which sandbox call failed.
        operation: &'static str,
        /// Error text.
        message: String,
        /// Class of the underlying sandbox error.
        class: FailureClass,
    },

    /// The freshly started service exited before becoming healthy.
    #[error("Service for tenant {tenant_id} exited with code {exit_code:?}: {stderr}")]
    ServiceExited {
        /// Tenant id.
        tenant_id: String,
        /// Exit code, if reported.
        exit_code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// The attempt this caller attached to was dropped.
    #[error(transparent)]
    Abandoned(#[from] FlightAbandoned),
}

impl WakeError {
    fn sandbox(tenant_id: &str, operation: &'static str, err: &SandboxError) -> Self {
        WakeError::Sandbox {
            tenant_id: tenant_id.to_string(),
            operation,
            message: err.to_string(),
            class: err.class(),
        }
    }

    /// Timeouts, early exits and abandoned attempts are retryable; sandbox
    /// failures keep the class of the underlying error.
    pub fn class(&self) -> FailureClass {
        match self {
            WakeError::Sandbox { class, .. } => *class,
            WakeError::Timeout { .. }
            | WakeError::ServiceExited { .. }
            | WakeError::Abandoned(_) => FailureClass::Retryable,
        }
    }
}

/// Outcome shared through the wake registry.
pub type WakeOutcome = std::result::Result<WakeReport, WakeError>;

/// Records and logs state transitions of one attempt.
struct Trace<'a> {
    tenant_id: &'a str,
    started: Instant,
    transitions: Vec<WakeState>,
}

impl<'a> Trace<'a> {
    fn new(tenant_id: &'a str) -> Self {
        Self {
            tenant_id,
            started: Instant::now(),
            transitions: vec![WakeState::Unknown],
        }
    }

    fn enter(&mut self, state: WakeState) {
        debug!(tenant_id = %self.tenant_id, state = ?state, "Wake state transition");
        self.transitions.push(state);
    }

    fn finish(mut self, woke: bool) -> WakeReport {
        self.enter(WakeState::Ready);
        WakeReport {
            tenant_id: self.tenant_id.to_string(),
            transitions: self.transitions,
            woke,
            shared: false,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Decides whether a tenant needs waking, wakes it and polls for readiness.
pub struct WakeController {
    config: WakeConfig,
    probe: HealthProbe,
    registry: SingleFlight<WakeOutcome>,
}

impl WakeController {
    /// Create a controller with an explicitly owned wake registry.
    pub fn new(config: WakeConfig, probe: HealthProbe, registry: SingleFlight<WakeOutcome>) -> Self {
        Self {
            config,
            probe,
            registry,
        }
    }

    /// Create a controller with its own registry built from `config`.
    pub fn with_config(config: WakeConfig, probe: HealthProbe) -> Self {
        let registry = SingleFlight::new("wake", config.registry_ttl, config.cooldown);
        Self::new(config, probe, registry)
    }

    /// Controller configuration.
    pub fn config(&self) -> &WakeConfig {
        &self.config
    }

    /// The wake registry.
    pub fn registry(&self) -> &SingleFlight<WakeOutcome> {
        &self.registry
    }

    /// Ensure the tenant's service is running and healthy, waiting at most
    /// `max_wait`.
    ///
    /// Concurrent callers for the same tenant attach to one attempt instead
    /// of starting the service twice. `max_wait` is capped at the registry's
    /// hold limit.
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    pub async fn ensure_ready(&self, tenant: &Tenant, max_wait: Duration) -> WakeOutcome {
        let max_wait = max_wait.min(self.registry.hold_limit());
        match self.registry.acquire(&tenant.id) {
            Acquire::New(permit) => {
                let mut last_error = None;
                let bounded =
                    tokio::time::timeout(max_wait, self.attempt(tenant, max_wait, &mut last_error))
                        .await;
                let outcome = bounded.unwrap_or_else(|_| {
                    warn!(
                        waited_ms = max_wait.as_millis() as u64,
                        last_error = ?last_error,
                        "Sandbox did not respond before the wake deadline"
                    );
                    Err(WakeError::Timeout {
                        tenant_id: tenant.id.clone(),
                        waited: max_wait,
                        last_error: last_error
                            .or_else(|| Some("sandbox call did not return".to_string())),
                    })
                });
                permit.complete(outcome.clone());
                outcome
            }
            Acquire::InFlight(attach) => {
                debug!(
                    held_for_ms = attach.held_for().as_millis() as u64,
                    "Attaching to in-flight wake"
                );
                match tokio::time::timeout(max_wait, attach.wait()).await {
                    Ok(Ok(outcome)) => outcome.map(|mut report| {
                        report.shared = true;
                        report
                    }),
                    Ok(Err(abandoned)) => Err(abandoned.into()),
                    Err(_) => Err(WakeError::Timeout {
                        tenant_id: tenant.id.clone(),
                        waited: max_wait,
                        last_error: Some("in-flight wake did not finish".to_string()),
                    }),
                }
            }
        }
    }

    fn is_service(&self, process: &ProcessInfo) -> bool {
        process.command.contains(&self.config.service.command)
    }

    fn service_env(&self, tenant: &Tenant) -> HashMap<String, String> {
        let mut env = self.config.service.env.clone();
        env.insert("SANDKEEP_TENANT_ID".to_string(), tenant.id.clone());
        env.insert("SANDKEEP_TIER".to_string(), tenant.tier.to_string());
        env
    }

    /// One wake attempt. Failures observed along the way are left in
    /// `last_error` so a caller that cuts the attempt short can report them.
    async fn attempt(
        &self,
        tenant: &Tenant,
        max_wait: Duration,
        last_error: &mut Option<String>,
    ) -> WakeOutcome {
        let sandbox = tenant.sandbox.as_ref();
        let mut trace = Trace::new(&tenant.id);
        let deadline = trace.started + max_wait;

        trace.enter(WakeState::Checking);
        let needs_wake = match sandbox.list_processes().await {
            Ok(processes) => {
                let service = processes
                    .iter()
                    .filter(|p| self.is_service(p))
                    .max_by_key(|p| p.is_alive());
                match service {
                    None => {
                        debug!("No service process found");
                        true
                    }
                    Some(p) if p.status != ProcessStatus::Running => {
                        debug!(process_id = %p.id, status = ?p.status, "Service process not running");
                        true
                    }
                    Some(_) => {
                        trace.enter(WakeState::HealthVerifying);
                        let timeout = self.probe.timeout().min(max_wait);
                        match self.probe.check(sandbox, timeout).await {
                            Ok(()) => false,
                            Err(reason) => {
                                warn!(reason = %reason, "Service running but sandbox unhealthy");
                                *last_error = Some(reason);
                                true
                            }
                        }
                    }
                }
            }
            Err(e) if e.class().is_retryable() => {
                debug!(error = %e, "Process list unavailable, assuming sandbox needs wake");
                *last_error = Some(e.to_string());
                true
            }
            Err(e) => {
                trace.enter(WakeState::Failed);
                return Err(WakeError::sandbox(&tenant.id, "list_processes", &e));
            }
        };

        if !needs_wake {
            return Ok(trace.finish(false));
        }

        trace.enter(WakeState::NeedsWake);
        info!("Waking sandbox");

        match sandbox::kill_all(sandbox).await {
            Ok(summary) if summary.killed + summary.failed > 0 => {
                debug!(killed = summary.killed, failed = summary.failed, "Cleared old processes");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Could not list processes to kill, continuing"),
        }
        tokio::time::sleep(
            self.config
                .settle_delay
                .min(deadline.saturating_duration_since(Instant::now())),
        )
        .await;

        trace.enter(WakeState::Waking);
        let env = self.service_env(tenant);
        let process = match sandbox.start_process(&self.config.service.command, &env).await {
            Ok(process) => process,
            Err(e) => {
                warn!(error = %e, "Failed to start service process");
                trace.enter(WakeState::Failed);
                return Err(WakeError::sandbox(&tenant.id, "start_process", &e));
            }
        };
        info!(process_id = %process.id, "Service process started");

        trace.enter(WakeState::HealthVerifying);
        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    waited_ms = now.duration_since(trace.started).as_millis() as u64,
                    last_error = ?last_error,
                    "Sandbox did not become ready in time"
                );
                trace.enter(WakeState::Failed);
                return Err(WakeError::Timeout {
                    tenant_id: tenant.id.clone(),
                    waited: now.duration_since(trace.started),
                    last_error: last_error.clone(),
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;

            if let Some(exited) = self.exited_service(tenant, &process.id).await {
                trace.enter(WakeState::Failed);
                return Err(exited);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                continue;
            }
            if let Err(reason) = self
                .probe
                .check(sandbox, self.probe.timeout().min(remaining))
                .await
            {
                *last_error = Some(reason);
                continue;
            }

            if let Some(port) = self.config.service.port {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if let Err(e) = sandbox.wait_for_port(port, remaining).await {
                    *last_error = Some(format!("port {} not ready: {}", port, e));
                    continue;
                }
            }

            let report = trace.finish(true);
            info!(elapsed_ms = report.elapsed_ms, "Sandbox ready");
            return Ok(report);
        }
    }

    async fn exited_service(&self, tenant: &Tenant, process_id: &str) -> Option<WakeError> {
        let processes = tenant.sandbox.list_processes().await.ok()?;
        let process = processes.iter().find(|p| p.id == process_id)?;
        if process.status != ProcessStatus::Exited {
            return None;
        }
        let stderr = tenant
            .sandbox
            .get_logs(process_id)
            .await
            .map(|logs| logs.stderr.trim().to_string())
            .unwrap_or_default();
        warn!(
            process_id = %process_id,
            exit_code = ?process.exit_code,
            stderr = %stderr,
            "Service process exited during startup"
        );
        Some(WakeError::ServiceExited {
            tenant_id: tenant.id.clone(),
            exit_code: process.exit_code,
            stderr,
        })
    }

    /// Ensure the sandbox is ready, then run `op`, retrying retryable
    /// failures with exponential backoff.
    ///
    /// A permanent failure stops immediately. Exhausting `policy.max_attempts`
    /// yields [`Error::ServiceUnavailable`] with the last error.
    #[instrument(skip(self, tenant, policy, op), fields(tenant_id = %tenant.id))]
    pub async fn with_retry<T, F, Fut>(
        &self,
        tenant: &Tenant,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = match self
                .ensure_ready(tenant, self.config.default_max_wait)
                .await
            {
                Ok(_) => op().await,
                Err(e) => Err(Error::Wake(e)),
            };
            attempt += 1;

            let e = match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !e.is_retryable() {
                warn!(attempt, error = %e, "Permanent failure, not retrying");
                return Err(e);
            }
            if attempt >= attempts {
                return Err(Error::ServiceUnavailable {
                    attempts,
                    last_error: Box::new(e),
                });
            }

            let delay = policy.delay_for_attempt(attempt - 1);
            warn!(
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Retryable failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
