// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for sandkeep-environment.

use std::path::PathBuf;
use std::time::Duration;

use sandkeep_core::wake::WakeConfig;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory for local sandboxes (one subdirectory per tenant).
    pub data_dir: PathBuf,
    /// Root of the filesystem durable store. `None` leaves replication
    /// unconfigured.
    pub durable_root: Option<PathBuf>,
    /// Command that starts the tenant service.
    pub service_command: String,
    /// Port the service listens on once ready.
    pub service_port: Option<u16>,
    /// Tenant configuration tree.
    pub config_dir: String,
    /// Tenant workspace tree.
    pub workspace_dir: String,
    /// Default budget for a wake.
    pub wake_timeout: Duration,
    /// Interval between scheduled replication passes.
    pub replication_interval: Duration,
    /// Tenants registered at startup.
    pub tenants: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(var("SANDKEEP_DATA_DIR").unwrap_or_else(|| ".data".to_string()));
        let durable_root = var("SANDKEEP_DURABLE_ROOT").map(PathBuf::from);

        let service_command =
            var("SANDKEEP_SERVICE_COMMAND").unwrap_or_else(|| "start-service.sh".to_string());

        let service_port = match var("SANDKEEP_SERVICE_PORT") {
            Some(v) => Some(v.trim().parse::<u16>().map_err(|_| ConfigError::InvalidPort(v))?),
            None => None,
        };

        let config_dir = var("SANDKEEP_CONFIG_DIR").unwrap_or_else(|| "/root/.gateway".to_string());
        let workspace_dir =
            var("SANDKEEP_WORKSPACE_DIR").unwrap_or_else(|| "/root/workspace".to_string());

        let wake_timeout = parse_secs(&var, "SANDKEEP_WAKE_TIMEOUT_SECS", 180)?;
        let wake_ttl = WakeConfig::default().registry_ttl;
        if wake_timeout >= wake_ttl {
            return Err(ConfigError::WakeTimeoutTooLong {
                timeout: wake_timeout,
                ttl: wake_ttl,
            });
        }
        let replication_interval = parse_secs(&var, "SANDKEEP_REPLICATION_INTERVAL_SECS", 300)?;
        if replication_interval.is_zero() {
            return Err(ConfigError::InvalidDuration {
                var: "SANDKEEP_REPLICATION_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        let tenants = var("SANDKEEP_TENANTS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            data_dir,
            durable_root,
            service_command,
            service_port,
            config_dir,
            workspace_dir,
            wake_timeout,
            replication_interval,
            tenants,
        })
    }
}

fn parse_secs<F>(var: &F, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidDuration { var: name, value: v }),
        None => Ok(Duration::from_secs(default)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The port number is invalid.
    #[error("Invalid port number: {0:?}")]
    InvalidPort(String),
    /// A duration variable is not a whole number of seconds.
    #[error("Invalid duration in {var}: {value:?}")]
    InvalidDuration {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    /// A wake this long would outlive its registry slot.
    #[error("Wake timeout {timeout:?} must be shorter than the wake registry TTL {ttl:?}")]
    WakeTimeoutTooLong {
        /// Configured wake timeout.
        timeout: Duration,
        /// Wake registry TTL.
        ttl: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from(".data"));
        assert_eq!(config.durable_root, None);
        assert_eq!(config.service_command, "start-service.sh");
        assert_eq!(config.service_port, None);
        assert_eq!(config.config_dir, "/root/.gateway");
        assert_eq!(config.workspace_dir, "/root/workspace");
        assert_eq!(config.wake_timeout, Duration::from_secs(180));
        assert_eq!(config.replication_interval, Duration::from_secs(300));
        assert!(config.tenants.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SANDKEEP_DURABLE_ROOT", "/mnt/durable"),
            ("SANDKEEP_SERVICE_PORT", "18789"),
            ("SANDKEEP_WAKE_TIMEOUT_SECS", "30"),
            ("SANDKEEP_TENANTS", "acme, globex,,initech "),
        ])
        .unwrap();
        assert_eq!(config.durable_root, Some(PathBuf::from("/mnt/durable")));
        assert_eq!(config.service_port, Some(18789));
        assert_eq!(config.wake_timeout, Duration::from_secs(30));
        assert_eq!(config.tenants, vec!["acme", "globex", "initech"]);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("SANDKEEP_DURABLE_ROOT", "  "), ("SANDKEEP_SERVICE_PORT", "")]).unwrap();
        assert_eq!(config.durable_root, None);
        assert_eq!(config.service_port, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("SANDKEEP_SERVICE_PORT", "99999")]),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            load(&[("SANDKEEP_WAKE_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::InvalidDuration { var: "SANDKEEP_WAKE_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            load(&[("SANDKEEP_REPLICATION_INTERVAL_SECS", "0")]),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_wake_timeout_must_stay_below_registry_ttl() {
        assert!(load(&[("SANDKEEP_WAKE_TIMEOUT_SECS", "299")]).is_ok());
        for value in ["300", "900"] {
            assert!(matches!(
                load(&[("SANDKEEP_WAKE_TIMEOUT_SECS", value)]),
                Err(ConfigError::WakeTimeoutTooLong { .. })
            ));
        }
    }
}
