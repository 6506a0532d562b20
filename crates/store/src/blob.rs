//! Content-addressed blob bucket backing file uploads and their thumbnails.
//!
//! Mirrors the teacher's `SessionStore::save_media`/`read_media` layout: a
//! plain directory tree on disk, all I/O pushed onto `spawn_blocking` so the
//! async runtime never blocks on filesystem calls.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

#[derive(Clone)]
pub struct BlobBucket {
    root: PathBuf,
}

impl BlobBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// sha256 hex digest of `bytes`, used as the content address.
    pub fn hash_of(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn path_for(&self, subdir: &str, hash: &str) -> PathBuf {
        // fan out by the first two hex chars to keep directories small
        let (prefix, _) = hash.split_at(2.min(hash.len()));
        self.root.join(subdir).join(prefix).join(hash)
    }

    /// Write `bytes` under `subdir` keyed by their content hash. Returns the
    /// hash. No-ops (beyond the hash computation) if the blob already exists
    /// — this is how upload dedup is implemented.
    pub async fn put(&self, subdir: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        let hash = Self::hash_of(&bytes);
        let path = self.path_for(subdir, &hash);
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if path.exists() {
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)?;
            Ok(())
        })
        .await??;
        Ok(hash)
    }

    /// Read the blob addressed by `hash` back from `subdir`.
    pub async fn get(&self, subdir: &str, hash: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path_for(subdir, hash);
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(path)).await??;
        Ok(bytes)
    }

    pub fn exists(&self, subdir: &str, hash: &str) -> bool {
        self.path_for(subdir, hash).exists()
    }

    /// Write `bytes` under an explicit `key` rather than its content hash.
    /// Used for derived artifacts (thumbnails) keyed by the owning
    /// document's id instead of their own bytes.
    pub async fn put_at(&self, subdir: &str, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        let path = self.path_for(subdir, key);
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    pub async fn get_at(&self, subdir: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(subdir, key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(path)).await??;
        Ok(Some(bytes))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        bytes.as_ref().iter().fold(String::new(), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = BlobBucket::new(dir.path());
        let hash = bucket.put("uploads", b"hello world".to_vec()).await.unwrap();
        let back = bucket.get("uploads", &hash).await.unwrap();
        assert_eq!(back, b"hello world");
    }

    #[tokio::test]
    async fn put_is_idempotent_for_same_content() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = BlobBucket::new(dir.path());
        let h1 = bucket.put("uploads", b"same".to_vec()).await.unwrap();
        let h2 = bucket.put("uploads", b"same".to_vec()).await.unwrap();
        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn different_content_hashes_differently() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = BlobBucket::new(dir.path());
        let h1 = bucket.put("uploads", b"a".to_vec()).await.unwrap();
        let h2 = bucket.put("uploads", b"b".to_vec()).await.unwrap();
        assert_ne!(h1, h2);
    }
}
