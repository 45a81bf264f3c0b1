// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandbox responsiveness probe.
//!
//! Runs a trivial command inside the sandbox and looks for a marker string in
//! its output. The probe never fails loudly: every problem becomes `false`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::sandbox::Sandbox;

/// Health probe configuration.
#[derive(Debug, Clone)]
pub struct HealthProbeConfig {
    /// Upper bound for one probe (start + exit + log read).
    pub timeout: Duration,
    /// String the probe command must print.
    pub marker: String,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            marker: "sandkeep-health-ok".to_string(),
        }
    }
}

/// Runs the health command against a sandbox.
#[derive(Debug, Clone, Default)]
pub struct HealthProbe {
    config: HealthProbeConfig,
}

impl HealthProbe {
    /// Create a probe.
    pub fn new(config: HealthProbeConfig) -> Self {
        Self { config }
    }

    /// Configured per-probe timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// True if the sandbox ran the probe command and printed the marker
    /// within `timeout`.
    pub async fn is_healthy(&self, sandbox: &dyn Sandbox, timeout: Duration) -> bool {
        self.check(sandbox, timeout).await.is_ok()
    }

    /// Like [`is_healthy`](Self::is_healthy) but keeps the reason for failure,
    /// which the wake controller reports as the last observed error.
    ///
    /// A probe command that did not exit in time gets a best-effort kill.
    pub async fn check(&self, sandbox: &dyn Sandbox, timeout: Duration) -> Result<(), String> {
        let command = format!("echo {}", self.config.marker);
        let mut running: Option<String> = None;

        let probe = async {
            let process = sandbox
                .start_process(&command, &HashMap::new())
                .await
                .map_err(|e| format!("health probe start failed: {}", e))?;
            running = Some(process.id.clone());
            sandbox
                .wait_for_exit(&process.id, timeout)
                .await
                .map_err(|e| format!("health probe did not exit: {}", e))?;
            running = None;
            let logs = sandbox
                .get_logs(&process.id)
                .await
                .map_err(|e| format!("health probe logs unavailable: {}", e))?;
            if logs.stdout.contains(&self.config.marker) {
                Ok(())
            } else {
                Err(format!(
                    "health probe output missing marker (stderr: {})",
                    logs.stderr.trim()
                ))
            }
        };

        let result = match tokio::time::timeout(timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(format!("health probe timed out after {:?}", timeout)),
        };

        if let Some(process_id) = running
            && let Err(e) = sandbox.kill_process(&process_id).await
        {
            warn!(
                sandbox_id = %sandbox.sandbox_id(),
                process_id = %process_id,
                error = %e,
                "Failed to kill stuck health probe"
            );
        }

        if let Err(reason) = &result {
            debug!(sandbox_id = %sandbox.sandbox_id(), reason = %reason, "Sandbox not healthy");
        }
        result
    }
}
