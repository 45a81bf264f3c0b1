// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for sandkeep-environment.

use thiserror::Error;

/// Errors from the environment layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Tenant id is not usable as a path component.
    #[error("Invalid tenant id: {0:?}")]
    InvalidTenantId(String),
}

/// Result type for environment operations.
pub type Result<T> = std::result::Result<T, Error>;
