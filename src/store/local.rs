// src/store/local.rs

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use super::ObjectStore;
use crate::error::{EtlError, Result};
use crate::warehouse::AccessKeys;

/// Objects as files under `<root>/<bucket>/<key>`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn read_text(&self, bucket: &str, key: &str) -> Result<String> {
        let path = self.path(bucket, key);
        let bytes = fs::read(&path)
            .await
            .map_err(|e| EtlError::object_store(path.display().to_string(), e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "read local object");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn locate(&self, bucket: &str, key: &str) -> String {
        self.path(bucket, key).display().to_string()
    }

    async fn access_keys(&self) -> Result<Option<AccessKeys>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_and_locate() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bucket/i94_data")).unwrap();
        std::fs::write(dir.path().join("bucket/i94_data/labels.SAS"), b"abc\xff").unwrap();

        let store = LocalObjectStore::new(dir.path());
        let text = store.read_text("bucket", "i94_data/labels.SAS").await.unwrap();
        assert_eq!(text, "abc\u{fffd}");
        assert_eq!(
            store.locate("bucket", "/i94_data/labels.SAS"),
            dir.path().join("bucket/i94_data/labels.SAS").display().to_string()
        );
        assert!(store.access_keys().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_object_is_a_store_error() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store.read_text("bucket", "nope").await.unwrap_err();
        assert!(matches!(err, EtlError::ObjectStore { .. }));
        assert!(err.is_transient());
    }
}
