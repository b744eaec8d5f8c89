//! Object storage port for the raw zone, with filesystem and in-memory
//! adapters. Keys are `/`-separated; listings are sorted like S3's.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `bucket` if missing. Returns true when it was created.
    async fn ensure_bucket(&self, bucket: &str) -> Result<bool>;
    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<()>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes>;
    /// Keys under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

fn check_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(GatewayError::Storage(format!("invalid object key '{}'", key)))
    }
}

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        check_key(bucket)?;
        Ok(self.root.join(bucket))
    }
}

fn walk(dir: &Path, base: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, base, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push(key);
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<bool> {
        let dir = self.bucket_dir(bucket)?;
        if tokio::fs::try_exists(&dir).await? {
            info!(bucket, "bucket already exists");
            return Ok(false);
        }
        tokio::fs::create_dir_all(&dir).await?;
        info!(bucket, "bucket created");
        Ok(true)
    }

    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<()> {
        check_key(key)?;
        let path = self.bucket_dir(bucket)?.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        check_key(key)?;
        let path = self.bucket_dir(bucket)?.join(key);
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let dir = self.bucket_dir(bucket)?;
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            if dir.exists() {
                walk(&dir, &dir, &mut keys)?;
            }
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
        .await?
    }
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    buckets: RwLock<BTreeSet<String>>,
    objects: RwLock<BTreeMap<(String, String), Bytes>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.write().await.insert(bucket.to_string()))
    }

    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<()> {
        check_key(key)?;
        if !self.buckets.read().await.contains(bucket) {
            return Err(GatewayError::Storage(format!("no such bucket '{}'", bucket)));
        }
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| GatewayError::Storage(format!("no such key '{}/{}'", bucket, key)))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn exercise(store: &dyn ObjectStore) {
        assert!(store.ensure_bucket("raw").await.unwrap());
        assert!(!store.ensure_bucket("raw").await.unwrap());

        store.put("raw", "03/b.csv", Bytes::from_static(b"b")).await.unwrap();
        store.put("raw", "03/a.csv", Bytes::from_static(b"a")).await.unwrap();
        store.put("raw", "24/c.csv", Bytes::from_static(b"c")).await.unwrap();

        assert_eq!(
            store.list("raw", "03/").await.unwrap(),
            vec!["03/a.csv".to_string(), "03/b.csv".to_string()]
        );
        assert_eq!(store.get("raw", "24/c.csv").await.unwrap(), Bytes::from_static(b"c"));
        assert!(store.get("raw", "nope.csv").await.is_err());
        assert!(store.put("raw", "../escape.csv", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn in_memory_store_behaves_like_a_bucket() {
        exercise(&InMemoryObjectStore::new()).await;
    }

    #[tokio::test]
    async fn fs_store_behaves_like_a_bucket() {
        let dir = tempdir().unwrap();
        exercise(&FsObjectStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn listing_a_missing_bucket_is_empty() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list("absent", "").await.unwrap().is_empty());
    }
}
