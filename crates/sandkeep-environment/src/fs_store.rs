// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filesystem-backed durable store.
//!
//! Keys map to files under a root directory, so the store and a mirror
//! target mounted at the same root see the same tree. Custom metadata lives
//! in JSON sidecars under `{root}/.sandkeep-meta/`. Objects written by other
//! tools (the mirror itself) have no sidecar; their metadata is taken from
//! the filesystem.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sandkeep_core::object_store::{
    ObjectMeta, ObjectStore, ObjectStoreError, Result, StoredObject,
};
use tracing::debug;
use uuid::Uuid;

const META_DIR: &str = ".sandkeep-meta";

/// Durable store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. Directories are created on write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its object path, rejecting keys that would escape
    /// the root or collide with the metadata directory.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative.components().all(|c| matches!(c, Component::Normal(_)))
            && !key.split('/').any(|s| s.is_empty() || s == "." || s == "..")
            && key.split('/').next() != Some(META_DIR);
        if !valid {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    async fn read_meta(&self, key: &str, path: &Path) -> Result<Option<ObjectMeta>> {
        let fs_meta = match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match tokio::fs::read(self.meta_path(key)).await {
            Ok(bytes) => {
                let mut meta: ObjectMeta = serde_json::from_slice(&bytes)?;
                // The object may have been replaced without going through `put`.
                if meta.size != fs_meta.len() {
                    meta.size = fs_meta.len();
                    meta.metadata.clear();
                }
                Ok(Some(meta))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let uploaded_at = fs_meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some(ObjectMeta {
                    key: key.to_string(),
                    size: fs_meta.len(),
                    uploaded_at,
                    metadata: HashMap::new(),
                }))
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.partial", Uuid::new_v4()));
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let path = self.object_path(key)?;
        let Some(meta) = self.read_meta(key, &path).await? else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(StoredObject { meta, content })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        content: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let path = self.object_path(key)?;
        let meta = ObjectMeta {
            key: key.to_string(),
            size: content.len() as u64,
            uploaded_at: Utc::now(),
            metadata,
        };

        write_atomic(&path, &content).await?;
        write_atomic(&self.meta_path(key), &serde_json::to_vec_pretty(&meta)?).await?;

        debug!(key = %key, size = meta.size, "Stored object");
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let path = self.object_path(key)?;
        self.read_meta(key, &path).await
    }
}
