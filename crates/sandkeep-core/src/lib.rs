// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandkeep Core - Wake Control and Verified Replication
//!
//! Keeps a fleet of hibernation-capable, one-per-tenant sandboxes usable and
//! their state durable. The crate consumes two external collaborators, a
//! [`Sandbox`] handle per tenant and a durable [`ObjectStore`], and provides
//! the engine on top of them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 Callers (API layer, scheduler, restarts)             │
//! └──────────────────────────────────────────────────────────────────────┘
//!            │ ensure_ready / with_retry          │ replicate_* / restart
//!            ▼                                    ▼
//! ┌──────────────────────┐   ┌──────────────────────────────────────────┐
//! │    WakeController    │   │ RestartOrchestrator ─► ShutdownCoordinator│
//! │  ┌────────────────┐  │   │                             │            │
//! │  │  HealthProbe   │  │   │                             ▼            │
//! │  └────────────────┘  │   │                    ReplicationEngine     │
//! │  wake SingleFlight   │   │                  replication SingleFlight│
//! └──────────────────────┘   └──────────────────────────────────────────┘
//!            │                                    │             │
//!            ▼                                    ▼             ▼
//! ┌──────────────────────────────────────────────────┐ ┌──────────────────┐
//! │            Sandbox (one per tenant)              │ │   ObjectStore    │
//! └──────────────────────────────────────────────────┘ └──────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most one wake and one replication in flight per tenant per process.
//!   Concurrent wakes share one attempt; concurrent replications are refused
//!   with lock contention.
//! - Every wait is bounded. Registry slots older than their TTL are
//!   reclaimable, so a crashed holder cannot block a tenant forever.
//! - A replication only succeeds once its marker has been read back with the
//!   id generated for that attempt.
//!
//! Locks are process-local and advisory. There is no cross-instance mutual
//! exclusion.
//!
//! # Modules
//!
//! - [`sandbox`]: sandbox boundary, `exec`/`kill_all` helpers, mock sandbox
//! - [`object_store`]: durable store boundary and in-memory store
//! - [`health`]: responsiveness probe
//! - [`single_flight`]: keyed single-flight registry with TTL reclaim
//! - [`wake`]: wake state machine and retry wrapper
//! - [`replication`]: full and critical replication passes
//! - [`shutdown`]: pre-shutdown sync and restart sequencing

#![deny(missing_docs)]

/// Error types and retry classification.
pub mod error;

/// Sandboxed compute boundary.
pub mod sandbox;

/// Durable object store boundary.
pub mod object_store;

/// Tenant model.
pub mod tenant;

/// Sandbox health probe.
pub mod health;

/// Keyed single-flight registry.
pub mod single_flight;

/// Retry policy.
pub mod retry;

/// Wake controller.
pub mod wake;

/// Replication engine.
pub mod replication;

/// Shutdown sync and restart orchestration.
pub mod shutdown;

pub use error::{Error, FailureClass, Result};
pub use health::{HealthProbe, HealthProbeConfig};
pub use object_store::{MemoryObjectStore, ObjectStore};
pub use replication::{
    ReplicationConfig, ReplicationEngine, ReplicationOptions, ReplicationResult,
    ReplicationTrigger, SyncOutcome,
};
pub use retry::RetryPolicy;
pub use sandbox::{MockSandbox, Sandbox};
pub use shutdown::{RestartOrchestrator, RestartResponse, ShutdownConfig, ShutdownCoordinator};
pub use single_flight::SingleFlight;
pub use tenant::{ResourceTier, Tenant};
pub use wake::{WakeConfig, WakeController, WakeError, WakeReport};
