//! S3-compatible object store adapter
//!
//! Plain HTTP client against an S3-compatible endpoint. Supports both
//! virtual-host addressing (AWS) and path-style addressing with an
//! explicit endpoint (MinIO, LocalStack). Requests are unsigned; deploy
//! against a service accepting simple authentication or behind a signing
//! proxy.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{PipelineError, StoreError};
use crate::ports::ObjectStore;

/// Object store connection parameters.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    /// Explicit endpoint URL for S3-compatible services. When set,
    /// path-style addressing is typically required.
    pub endpoint: Option<String>,
    pub path_style: bool,
    /// Credentials for services that take simple authentication; unused
    /// when the deployment signs at a fronting proxy.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            bucket: "anchor-artifacts".to_string(),
            region: "us-west-2".to_string(),
            endpoint: None,
            path_style: false,
            access_key_id: None,
            secret_access_key: None,
            timeout_secs: 30,
        }
    }
}

/// HTTP implementation of the object-store capability.
pub struct HttpObjectStore {
    config: ObjectStoreConfig,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(config: ObjectStoreConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        match &self.config.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.config.region),
        }
    }

    fn bucket_url(&self) -> String {
        let endpoint = self.endpoint();
        if self.config.path_style {
            format!("{}/{}", endpoint, self.config.bucket)
        } else {
            let host = endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            format!("https://{}.{}", self.config.bucket, host)
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url(), key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn ensure_bucket(&self) -> Result<(), StoreError> {
        let url = self.bucket_url();

        let head = self.client.head(&url).send().await;
        if matches!(&head, Ok(response) if response.status().is_success()) {
            info!(bucket = %self.config.bucket, "using existing bucket");
            return Ok(());
        }

        // Region rule: us-east-1 rejects an explicit location constraint.
        let mut request = self.client.put(&url);
        if self.config.region != "us-east-1" {
            let body = format!(
                "<CreateBucketConfiguration><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.config.region
            );
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| StoreError::BucketFailed {
            bucket: self.config.bucket.clone(),
            reason: e.to_string(),
        })?;

        // 409 means the bucket already exists under this account.
        if response.status().is_success() || response.status().as_u16() == 409 {
            info!(bucket = %self.config.bucket, region = %self.config.region, "bucket ready");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::BucketFailed {
                bucket: self.config.bucket.clone(),
                reason: format!("{status} - {body}"),
            })
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let url = self.object_url(key);

        let response = self
            .client
            .put(&url)
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::UploadFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::UploadFailed {
                key: key.to_string(),
                reason: format!("{status} - {body}"),
            })
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let url = self.object_url(key);

        let response =
            self.client
                .delete(&url)
                .send()
                .await
                .map_err(|e| StoreError::DeleteFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;

        // A missing object is already deleted.
        if response.status().is_success() || response.status().as_u16() == 404 {
            Ok(())
        } else {
            let status = response.status();
            warn!(key = %key, status = %status, "delete returned unexpected status");
            Err(StoreError::DeleteFailed {
                key: key.to_string(),
                reason: status.to_string(),
            })
        }
    }

    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn reference_url(&self, key: &str) -> String {
        self.object_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_host_addressing() {
        let store = HttpObjectStore::new(ObjectStoreConfig {
            bucket: "anchor-demo".to_string(),
            region: "us-west-2".to_string(),
            ..ObjectStoreConfig::default()
        })
        .unwrap();

        assert_eq!(
            store.object_url("db/t/BATCH-X/batch-data.json"),
            "https://anchor-demo.s3.us-west-2.amazonaws.com/db/t/BATCH-X/batch-data.json"
        );
    }

    #[test]
    fn test_path_style_addressing() {
        let store = HttpObjectStore::new(ObjectStoreConfig {
            bucket: "anchor-demo".to_string(),
            endpoint: Some("http://localhost:9000".to_string()),
            path_style: true,
            ..ObjectStoreConfig::default()
        })
        .unwrap();

        assert_eq!(
            store.object_url("a/b.json"),
            "http://localhost:9000/anchor-demo/a/b.json"
        );
        assert_eq!(store.bucket(), "anchor-demo");
    }

    #[test]
    fn test_reference_url_matches_object_url() {
        let store = HttpObjectStore::new(ObjectStoreConfig::default()).unwrap();
        assert_eq!(store.reference_url("k.json"), store.object_url("k.json"));
    }
}
