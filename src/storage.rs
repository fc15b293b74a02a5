//! Object storage trait boundary. Auth, retry/backoff, and multi-region
//! routing are left to the SDK's own defaults; this module provides the
//! trait, a filesystem-backed implementation for local/dev/test use, and a
//! thin S3-backed implementation (feature `s3`) built on `aws_sdk_s3::Client`
//! and `ByteStream` uploads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;

use crate::error::{ComposeError, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn size(&self, key: &str) -> Result<u64>;
}

pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemStore { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        debug!("fs store: get {path:?}");
        Ok(tokio::fs::read(&path).await?)
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!("fs store: put {path:?} ({} bytes)", data.len());
        Ok(tokio::fs::write(&path, data).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.path_for(prefix);
        let mut out = Vec::new();
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ComposeError::Io(e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.path_for(key)).await.is_ok())
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let meta = tokio::fs::metadata(self.path_for(key)).await?;
        Ok(meta.len())
    }
}

pub fn local_path_for_key(root: &Path, key: &str) -> PathBuf {
    root.join(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        store.put("district/chart-geojson/a/a.geojson", b"{}").await.unwrap();
        assert!(store.exists("district/chart-geojson/a/a.geojson").await.unwrap());
        assert_eq!(store.get("district/chart-geojson/a/a.geojson").await.unwrap(), b"{}");
        assert_eq!(store.size("district/chart-geojson/a/a.geojson").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_recurses_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        store.put("d/chart-geojson/a/a.geojson", b"{}").await.unwrap();
        store.put("d/chart-geojson/b/b.geojson", b"{}").await.unwrap();
        store.put("d/chart-geojson/_manifest.json", b"{}").await.unwrap();
        let mut listed = store.list("d/chart-geojson/").await.unwrap();
        listed.sort();
        assert_eq!(
            listed,
            vec![
                "d/chart-geojson/_manifest.json",
                "d/chart-geojson/a/a.geojson",
                "d/chart-geojson/b/b.geojson",
            ]
        );
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        assert!(store.delete("nope").await.is_ok());
    }
}

#[cfg(feature = "s3")]
pub mod s3 {
    use super::*;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client;

    pub struct S3Store {
        client: Client,
        bucket: String,
    }

    impl S3Store {
        pub async fn new(bucket: impl Into<String>) -> Self {
            let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let client = Client::new(&config);
            S3Store { client, bucket: bucket.into() }
        }
    }

    #[async_trait]
    impl ObjectStore for S3Store {
        async fn get(&self, key: &str) -> Result<Vec<u8>> {
            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| ComposeError::Storage(e.to_string()))?;
            let bytes = resp
                .body
                .collect()
                .await
                .map_err(|e| ComposeError::Storage(e.to_string()))?;
            Ok(bytes.into_bytes().to_vec())
        }

        async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
                .map_err(|e| ComposeError::Storage(e.to_string()))?;
            Ok(())
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            let mut out = Vec::new();
            let mut continuation = None;
            loop {
                let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
                if let Some(token) = continuation.take() {
                    req = req.continuation_token(token);
                }
                let resp = req.send().await.map_err(|e| ComposeError::Storage(e.to_string()))?;
                for obj in resp.contents() {
                    if let Some(key) = obj.key() {
                        out.push(key.to_string());
                    }
                }
                if resp.is_truncated().unwrap_or(false) {
                    continuation = resp.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }
            Ok(out)
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| ComposeError::Storage(e.to_string()))?;
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            match self.client.head_object().bucket(&self.bucket).key(key).send().await {
                Ok(_) => Ok(true),
                Err(_) => Ok(false),
            }
        }

        async fn size(&self, key: &str) -> Result<u64> {
            let resp = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| ComposeError::Storage(e.to_string()))?;
            Ok(resp.content_length().unwrap_or(0) as u64)
        }
    }
}
