// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for sandkeep-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object_store::ObjectStoreError;
use crate::sandbox::SandboxError;
use crate::wake::WakeError;

/// Whether a failure is worth retrying.
///
/// The class is decided by the variant built at the failure site, so callers
/// never need to inspect error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Transient container condition (hibernating, timeout, refused, not found).
    Retryable,
    /// Anything else. Surfaced without retry.
    Permanent,
}

impl FailureClass {
    /// Returns true for [`FailureClass::Retryable`].
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Retryable)
    }
}

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Sandbox operation failed.
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Durable object store operation failed.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    /// Bringing the sandbox to a ready state failed.
    #[error("Wake error: {0}")]
    Wake(#[from] WakeError),

    /// All retry attempts were spent on retryable failures.
    #[error("Service unavailable after {attempts} attempts: {last_error}")]
    ServiceUnavailable {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: Box<Error>,
    },
}

impl Error {
    /// Classify this error for retry decisions.
    pub fn class(&self) -> FailureClass {
        match self {
            Error::Sandbox(e) => e.class(),
            Error::ObjectStore(e) => e.class(),
            Error::Wake(e) => e.class(),
            Error::ServiceUnavailable { .. } => FailureClass::Permanent,
        }
    }

    /// Shorthand for `self.class().is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

/// Result type using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sandbox_errors_carry_their_class() {
        let err: Error = SandboxError::Hibernating.into();
        assert!(err.is_retryable());

        let err: Error = SandboxError::ConnectionRefused("port 18789".into()).into();
        assert!(err.is_retryable());

        let err: Error = SandboxError::Other("bad command".into()).into();
        assert_eq!(err.class(), FailureClass::Permanent);
    }

    #[test]
    fn test_service_unavailable_wraps_last_error() {
        let err = Error::ServiceUnavailable {
            attempts: 3,
            last_error: Box::new(SandboxError::Timeout(Duration::from_secs(5)).into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempts"));
        assert!(msg.contains("timed out"));
        assert_eq!(err.class(), FailureClass::Permanent);
    }
}
