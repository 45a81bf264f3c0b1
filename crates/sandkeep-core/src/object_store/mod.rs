// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable object store boundary.
//!
//! The store holds each tenant's mirrored state and the replication markers.
//! The core only needs `get`, `put` and `head`.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FailureClass;

pub use memory::MemoryObjectStore;

/// Errors from object store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ObjectStoreError {
    /// The key is not acceptable to the backend.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The store could not be reached or throttled the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ObjectStoreError {
    /// Only an unavailable store is worth retrying.
    pub fn class(&self) -> FailureClass {
        match self {
            ObjectStoreError::Unavailable(_) => FailureClass::Retryable,
            _ => FailureClass::Permanent,
        }
    }
}

/// Result type for object store operations.
pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// Object metadata returned by `head` and `get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key.
    pub key: String,
    /// Content length in bytes.
    pub size: u64,
    /// When the object was last written.
    pub uploaded_at: DateTime<Utc>,
    /// Custom metadata supplied on `put`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// An object with its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Metadata.
    pub meta: ObjectMeta,
    /// Raw content.
    pub content: Vec<u8>,
}

impl StoredObject {
    /// Content as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Durable object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Create or replace an object.
    async fn put(
        &self,
        key: &str,
        content: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Fetch metadata only, `None` if absent.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;
}
