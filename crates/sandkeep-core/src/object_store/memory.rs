// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory object store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{ObjectMeta, ObjectStore, ObjectStoreError, Result, StoredObject};

/// Object store kept in process memory. Used by tests and single-node setups
/// where durability is provided elsewhere.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    /// Keys whose writes are silently replaced with this content.
    /// Simulates a store that acknowledges writes it did not persist.
    corrupt_writes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_puts: Arc<Mutex<u32>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge writes to `key` but persist `content` instead.
    pub async fn corrupt_writes_to(&self, key: &str, content: &str) {
        self.corrupt_writes
            .lock()
            .await
            .insert(key.to_string(), content.as_bytes().to_vec());
    }

    /// Fail the next `n` puts with [`ObjectStoreError::Unavailable`].
    pub async fn fail_next_puts(&self, n: u32) {
        *self.fail_puts.lock().await = n;
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// True if the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        Ok(self.objects.lock().await.get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        content: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        {
            let mut fail = self.fail_puts.lock().await;
            if *fail > 0 {
                *fail -= 1;
                return Err(ObjectStoreError::Unavailable(format!(
                    "put {} rejected",
                    key
                )));
            }
        }

        let content = match self.corrupt_writes.lock().await.get(key) {
            Some(replacement) => replacement.clone(),
            None => content,
        };

        let object = StoredObject {
            meta: ObjectMeta {
                key: key.to_string(),
                size: content.len() as u64,
                uploaded_at: Utc::now(),
                metadata,
            },
            content,
        };
        self.objects.lock().await.insert(key.to_string(), object);
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        Ok(self
            .objects
            .lock()
            .await
            .get(key)
            .map(|o| o.meta.clone()))
    }
}
