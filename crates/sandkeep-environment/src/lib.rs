// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandkeep Environment - Local Backends and Fleet Runtime
//!
//! Runs the sandkeep engine against concrete collaborators: host-local
//! sandboxes, a filesystem durable store, a tenant registry and a background
//! replication scheduler, wired together by an embeddable runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     FleetRuntime (this crate)                     │
//! │  ┌──────────────┐  ┌───────────────┐  ┌────────────────────────┐  │
//! │  │    Tenant    │  │  Replication  │  │ WakeController, Engine │  │
//! │  │   Registry   │  │   Scheduler   │  │  RestartOrchestrator   │  │
//! │  └──────────────┘  └───────────────┘  └────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────┘
//!          │ one per tenant                         │ markers
//!          ▼                                        ▼
//! ┌───────────────────────────────┐   ┌───────────────────────────────┐
//! │ LocalSandbox ({data_dir}/{id})│──►│ FsObjectStore ({durable_root})│
//! │  sh -c, process groups, logs  │   │  files + JSON metadata        │
//! └───────────────────────────────┘   └───────────────────────────────┘
//! ```
//!
//! Mirrors are written by the sandbox into `{durable_root}/tenants/{id}`,
//! the same tree the store reads markers from.
//!
//! # Configuration
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `SANDKEEP_DATA_DIR` | `.data` | Root for local sandboxes |
//! | `SANDKEEP_DURABLE_ROOT` | unset | Durable store root; unset disables replication |
//! | `SANDKEEP_SERVICE_COMMAND` | `start-service.sh` | Service process command |
//! | `SANDKEEP_SERVICE_PORT` | unset | Readiness port |
//! | `SANDKEEP_CONFIG_DIR` | `/root/.gateway` | Tenant configuration tree |
//! | `SANDKEEP_WORKSPACE_DIR` | `/root/workspace` | Tenant workspace tree |
//! | `SANDKEEP_WAKE_TIMEOUT_SECS` | `180` | Default wake budget |
//! | `SANDKEEP_REPLICATION_INTERVAL_SECS` | `300` | Scheduled replication interval |
//! | `SANDKEEP_TENANTS` | empty | Comma-separated tenants registered at start |

#![deny(missing_docs)]

/// Environment configuration.
pub mod config;

/// Error types.
pub mod error;

/// Filesystem durable store.
pub mod fs_store;

/// Host-local sandbox.
pub mod local_sandbox;

/// Scheduled replication worker.
pub mod replication_scheduler;

/// Embeddable runtime.
pub mod runtime;

/// Tenant registry and sandbox providers.
pub mod tenants;

pub use config::Config;
pub use error::{Error, Result};
pub use fs_store::FsObjectStore;
pub use local_sandbox::LocalSandbox;
pub use runtime::FleetRuntime;
pub use tenants::TenantRegistry;
