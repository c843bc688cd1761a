//! Content-addressed blob stores for large payloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::error::BlobError;
use super::traits::BlobStore;
use super::types::{BlobRef, TaskPayload};

/// Lowercase hex SHA-256 of `data`.
pub fn content_digest(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

fn is_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn verify(digest: &str, data: &[u8]) -> Result<(), BlobError> {
    if content_digest(data) != digest {
        return Err(BlobError::Corrupt {
            digest: digest.to_string(),
        });
    }
    Ok(())
}

/// Build the payload for a task: inline up to `inline_max` bytes, otherwise
/// stored in `blobs` and referenced by digest.
pub async fn store_payload(
    text: String,
    inline_max: usize,
    blobs: &dyn BlobStore,
) -> Result<TaskPayload, BlobError> {
    if text.len() <= inline_max {
        return Ok(TaskPayload::Inline { text });
    }
    let blob = blobs.put(text.as_bytes()).await?;
    debug!(digest = %blob.digest, len = blob.len, "Payload moved to blob store");
    Ok(TaskPayload::Blob {
        digest: blob.digest,
        len: blob.len,
    })
}

/// Recover the text of a task payload.
pub async fn load_payload(payload: &TaskPayload, blobs: &dyn BlobStore) -> Result<String, BlobError> {
    match payload {
        TaskPayload::Inline { text } => Ok(text.clone()),
        TaskPayload::Blob { digest, .. } => {
            let data = blobs.get(digest).await?;
            String::from_utf8(data).map_err(|_| BlobError::Corrupt {
                digest: digest.clone(),
            })
        }
    }
}

/// Blob store held in process memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, data: &[u8]) -> Result<BlobRef, BlobError> {
        let digest = content_digest(data);
        let mut blobs = self
            .blobs
            .write()
            .map_err(|e| BlobError::Io(std::io::Error::other(e.to_string())))?;
        blobs
            .entry(digest.clone())
            .or_insert_with(|| data.to_vec());
        Ok(BlobRef {
            digest,
            len: data.len(),
        })
    }

    async fn get(&self, digest: &str) -> Result<Vec<u8>, BlobError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|e| BlobError::Io(std::io::Error::other(e.to_string())))?;
        blobs.get(digest).cloned().ok_or_else(|| BlobError::NotFound {
            digest: digest.to_string(),
        })
    }
}

/// Blob store on the local filesystem.
///
/// Blobs live at `<root>/<first two hex chars>/<digest>`. Writes go to a
/// temporary file first and are renamed into place.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create the store, creating `root` if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, digest: &str) -> Result<PathBuf, BlobError> {
        if !is_digest(digest) {
            return Err(BlobError::NotFound {
                digest: digest.to_string(),
            });
        }
        Ok(self.root.join(&digest[..2]).join(digest))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn put(&self, data: &[u8]) -> Result<BlobRef, BlobError> {
        let digest = content_digest(data);
        let path = self.path_for(&digest)?;

        if !tokio::fs::try_exists(&path).await? {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
            tokio::fs::write(&tmp, data).await?;
            tokio::fs::rename(&tmp, &path).await?;
        }

        Ok(BlobRef {
            digest,
            len: data.len(),
        })
    }

    async fn get(&self, digest: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(digest)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound {
                    digest: digest.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        verify(digest, &data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_digest() {
        assert_eq!(
            content_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(is_digest(&content_digest(b"")));
        assert!(!is_digest("../etc/passwd"));
    }

    #[tokio::test]
    async fn test_memory_store_dedupes() {
        let store = MemoryBlobStore::new();
        let first = store.put(b"same content").await.unwrap();
        let second = store.put(b"same content").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&first.digest).await.unwrap(), b"same content");

        assert!(matches!(
            store.get(&content_digest(b"other")).await,
            Err(BlobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs")).unwrap();

        let blob = store.put(b"a long transcript").await.unwrap();
        assert_eq!(blob.len, 17);
        let expected = dir
            .path()
            .join("blobs")
            .join(&blob.digest[..2])
            .join(&blob.digest);
        assert!(expected.exists());
        assert_eq!(store.get(&blob.digest).await.unwrap(), b"a long transcript");
    }

    #[tokio::test]
    async fn test_fs_store_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        let blob = store.put(b"original").await.unwrap();

        std::fs::write(store.path_for(&blob.digest).unwrap(), b"tampered").unwrap();
        assert!(matches!(
            store.get(&blob.digest).await,
            Err(BlobError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_non_digest_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.get("../../secret").await,
            Err(BlobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_payload_inline_or_blob() {
        let blobs = MemoryBlobStore::new();

        let small = store_payload("short".to_string(), 10, &blobs).await.unwrap();
        assert!(matches!(small, TaskPayload::Inline { .. }));
        assert!(blobs.is_empty());

        let text = "x".repeat(11);
        let large = store_payload(text.clone(), 10, &blobs).await.unwrap();
        match &large {
            TaskPayload::Blob { digest, len } => {
                assert_eq!(*len, 11);
                assert_eq!(digest, &content_digest(text.as_bytes()));
            }
            other => panic!("expected blob payload, got {:?}", other),
        }

        assert_eq!(load_payload(&small, &blobs).await.unwrap(), "short");
        assert_eq!(load_payload(&large, &blobs).await.unwrap(), text);
    }
}
