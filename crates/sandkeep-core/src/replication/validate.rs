// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Source validation run before any copy.
//!
//! A missing or corrupt primary config must never overwrite a good backup.

use serde_json::Value;

use crate::sandbox::{Sandbox, SandboxError};

use super::result::{ReplicationErrorKind, ReplicationFailure};

/// Check that `path` exists, is a JSON object and has at least one of
/// `required_sections` as a top-level key.
pub(crate) async fn validate_primary_config(
    sandbox: &dyn Sandbox,
    path: &str,
    required_sections: &[String],
) -> Result<(), ReplicationFailure> {
    let content = match sandbox.read_file(path).await {
        Ok(content) => content,
        Err(SandboxError::NotFound(_)) => {
            return Err(ReplicationFailure::new(
                ReplicationErrorKind::SourceValidation,
                format!("primary config {} is missing", path),
            ));
        }
        Err(e) => return Err(ReplicationFailure::sandbox("read primary config", &e)),
    };

    let parsed: Value = serde_json::from_str(&content).map_err(|e| {
        ReplicationFailure::new(
            ReplicationErrorKind::SourceValidation,
            format!("primary config {} is not valid JSON: {}", path, e),
        )
    })?;

    let Some(object) = parsed.as_object() else {
        return Err(ReplicationFailure::new(
            ReplicationErrorKind::SourceValidation,
            format!("primary config {} is not a JSON object", path),
        ));
    };

    if required_sections.is_empty() || required_sections.iter().any(|s| object.contains_key(s)) {
        Ok(())
    } else {
        Err(ReplicationFailure::new(
            ReplicationErrorKind::SourceValidation,
            format!(
                "primary config {} has none of the required sections [{}]",
                path,
                required_sections.join(", ")
            ),
        ))
    }
}
