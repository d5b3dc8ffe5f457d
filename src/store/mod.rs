// src/store/mod.rs

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::error::{EtlError, Result};
use crate::warehouse::AccessKeys;

pub mod local;
pub mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

/// Where raw files live.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object as text (lossy UTF-8; label files are mostly ASCII).
    async fn read_text(&self, bucket: &str, key: &str) -> Result<String>;

    /// Location of an object (or key prefix) as the warehouse should see it.
    fn locate(&self, bucket: &str, key: &str) -> String;

    /// Keys a warehouse can use to read this store directly, if any.
    async fn access_keys(&self) -> Result<Option<AccessKeys>>;
}

/// Build a store from a CLI location: `s3://` or a local directory
/// (`file:///data` or a plain path).
pub async fn open(location: &str) -> Result<Arc<dyn ObjectStore>> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "s3" => Ok(Arc::new(S3ObjectStore::from_env().await)),
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| EtlError::Config(format!("bad file url {}", location)))?;
            Ok(Arc::new(LocalObjectStore::new(path)))
        }
        Ok(url) if url.scheme().len() > 1 => Err(EtlError::Config(format!(
            "unsupported store scheme {}",
            url.scheme()
        ))),
        // plain paths, including Windows drive letters
        _ => Ok(Arc::new(LocalObjectStore::new(PathBuf::from(location)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_local_variants() {
        let dir = tempdir().unwrap();
        let plain = open(&dir.path().display().to_string()).await.unwrap();
        assert!(plain.locate("b", "k").ends_with("k"));

        let url = Url::from_directory_path(dir.path()).unwrap();
        let via_url = open(url.as_str()).await.unwrap();
        assert_eq!(via_url.locate("b", "k"), plain.locate("b", "k"));
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        assert!(matches!(
            open("gs://bucket").await,
            Err(EtlError::Config(_))
        ));
    }
}
