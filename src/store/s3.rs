// src/store/s3.rs

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::Client;
use tracing::{debug, instrument};

use super::ObjectStore;
use crate::error::{EtlError, Result};
use crate::warehouse::AccessKeys;

/// Amazon S3 via the default AWS credential chain.
pub struct S3ObjectStore {
    client: Client,
    config: SdkConfig,
}

impl S3ObjectStore {
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(config)
    }

    pub fn new(config: SdkConfig) -> Self {
        let client = Client::new(&config);
        Self { client, config }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(level = "debug", skip(self))]
    async fn read_text(&self, bucket: &str, key: &str) -> Result<String> {
        let location = self.locate(bucket, key);
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| EtlError::object_store(&location, e))?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| EtlError::object_store(&location, e))?
            .into_bytes();
        debug!(%location, bytes = bytes.len(), "read s3 object");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn locate(&self, bucket: &str, key: &str) -> String {
        format!("s3://{}/{}", bucket, key.trim_start_matches('/'))
    }

    async fn access_keys(&self) -> Result<Option<AccessKeys>> {
        let Some(provider) = self.config.credentials_provider() else {
            return Ok(None);
        };
        let creds = provider
            .provide_credentials()
            .await
            .map_err(|e| EtlError::object_store("aws credential chain", e))?;
        Ok(Some(AccessKeys {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().map(str::to_string),
        }))
    }
}
