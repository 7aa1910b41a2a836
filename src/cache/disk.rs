//! Cache storage persisted to a directory.
//!
//! Layout under the root directory:
//!
//! ```text
//! caches.json          ordered partition names
//! <partition-id>/
//!     index.json       stored entries (request key, status, headers, ...)
//!     <entry-id>.<micros>.body  raw response body
//! ```
//!
//! Ids are URL-safe base64 SHA-256 digests, so any partition name or URL maps
//! to a valid file name. Index and manifest writes go to a `.part` file that
//! is renamed into place. Writers hold the storage lock exclusively and
//! lookups hold it shared, so a body file is never removed while a reader
//! still has the index entry that names it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::{CacheKey, Response, hashed_id};

const MANIFEST_FILE: &str = "caches.json";
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    caches: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PartitionIndex {
    name: String,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    key: CacheKey,
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    url: String,
    body_file: String,
    body_len: u64,
    cached_at: DateTime<Utc>,
}

impl StoredEntry {
    fn into_response(self, body: Bytes) -> Response {
        Response {
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body,
            url: self.url,
        }
    }
}

/// Cache storage rooted at a directory on disk.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    lock: RwLock<()>,
}

/// Returns the `.part` path used while writing `path`.
fn part_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

/// Writes `data` to `path` via a `.part` file and rename.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let pp = part_path(path);
    tokio::fs::write(&pp, data).await?;
    tokio::fs::rename(&pp, path).await?;
    Ok(())
}

/// Reads and decodes a JSON file, returning `None` if it does not exist.
async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl DiskCacheStorage {
    /// Creates a storage rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: RwLock::new(()),
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, name: &str) -> PathBuf {
        self.root.join(hashed_id(name))
    }

    async fn load_manifest(&self) -> Result<Manifest> {
        Ok(read_json(&self.root.join(MANIFEST_FILE))
            .await?
            .unwrap_or_default())
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        write_atomic(
            &self.root.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(manifest)?,
        )
        .await
    }

    async fn load_index(&self, name: &str) -> Result<Option<PartitionIndex>> {
        read_json(&self.partition_dir(name).join(INDEX_FILE)).await
    }

    async fn save_index(&self, index: &PartitionIndex) -> Result<()> {
        write_atomic(
            &self.partition_dir(&index.name).join(INDEX_FILE),
            &serde_json::to_vec_pretty(index)?,
        )
        .await
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut manifest = self.load_manifest().await?;
        if manifest.caches.iter().any(|n| n == name) {
            return Ok(());
        }

        tokio::fs::create_dir_all(self.partition_dir(name)).await?;
        self.save_index(&PartitionIndex {
            name: name.to_string(),
            entries: Vec::new(),
        })
        .await?;
        manifest.caches.push(name.to_string());
        self.save_manifest(&manifest).await?;
        log::debug!("Created cache partition {name} in {}", self.root.display());
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.load_manifest().await?.caches.iter().any(|n| n == name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.write().await;
        let mut manifest = self.load_manifest().await?;
        let before = manifest.caches.len();
        manifest.caches.retain(|n| n != name);
        if manifest.caches.len() == before {
            return Ok(false);
        }

        self.save_manifest(&manifest).await?;
        match tokio::fs::remove_dir_all(self.partition_dir(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.load_manifest().await?.caches)
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>> {
        let index = self
            .load_index(name)
            .await?
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))?;
        let mut keys: Vec<_> = index.entries.into_iter().map(|e| e.key).collect();
        keys.sort();
        Ok(keys)
    }

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, Response)>) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut index = self
            .load_index(name)
            .await?
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))?;
        let dir = self.partition_dir(name);
        let mut replaced = Vec::new();

        for (key, response) in entries {
            let cached_at = Utc::now();
            let body_file = format!("{}.{}.body", key.file_id(), cached_at.timestamp_micros());
            write_atomic(&dir.join(&body_file), &response.body).await?;

            let entry = StoredEntry {
                body_file,
                body_len: response.body.len() as u64,
                cached_at,
                key,
                status: response.status,
                status_text: response.status_text,
                headers: response.headers,
                url: response.url,
            };
            if let Some(pos) = index.entries.iter().position(|e| e.key == entry.key) {
                replaced.push(index.entries.remove(pos).body_file);
            }
            index.entries.push(entry);
        }

        // Bodies are in place; the index rename publishes them all at once.
        self.save_index(&index).await?;

        for body_file in replaced {
            if index.entries.iter().any(|e| e.body_file == body_file) {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(dir.join(&body_file)).await {
                log::debug!("Could not remove replaced body {body_file}: {e}");
            }
        }
        Ok(())
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<Response>> {
        let _guard = self.lock.read().await;
        let Some(index) = self.load_index(name).await? else {
            return Ok(None);
        };
        let Some(entry) = index.entries.into_iter().find(|e| &e.key == key) else {
            return Ok(None);
        };

        let body = tokio::fs::read(self.partition_dir(name).join(&entry.body_file)).await?;
        if body.len() as u64 != entry.body_len {
            log::warn!(
                "Cached body for {key} has {} bytes, index says {}",
                body.len(),
                entry.body_len
            );
        }
        Ok(Some(entry.into_response(Bytes::from(body))))
    }
}
