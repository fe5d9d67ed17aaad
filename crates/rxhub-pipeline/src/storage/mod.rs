//! Object store for raw batch payloads and per-chunk slices.
//!
//! S3-compatible (MinIO in development via endpoint override). Objects are
//! write-once: intake writes the raw payload, the chunker writes slices,
//! and workers only read.

use anyhow::{anyhow, Context, Result};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub mod config;

#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
}

impl ObjectStore {
    pub async fn new(config: config::StorageConfig) -> Result<Self> {
        debug!("Initializing object store with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "rxhub-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Object store client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    /// Upload an object with metadata tags.
    #[instrument(skip(self, data, metadata))]
    pub async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        metadata: &[(&str, &str)],
    ) -> Result<()> {
        debug!("Uploading {} bytes to s3://{}/{}", data.len(), self.bucket, key);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data));

        for (name, value) in metadata {
            request = request.metadata(*name, *value);
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to upload to S3: {}", key))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download from S3: {}", key))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);

        Ok(data)
    }

    #[instrument(skip(self))]
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("404") {
                    Ok(false)
                } else {
                    Err(anyhow!("Failed to check S3 object existence: {}", e))
                }
            },
        }
    }

    /// Key for a batch's raw payload, namespaced by pharmacy and batch.
    pub fn batch_key(&self, registry_code: &str, batch_id: Uuid) -> String {
        format!("batches/{}/{}.json", registry_code, batch_id)
    }

    /// Key for one chunk's slice of a batch.
    pub fn chunk_key(&self, registry_code: &str, batch_id: Uuid, chunk_index: i32) -> String {
        format!("chunks/{}/{}/{}.json", registry_code, batch_id, chunk_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ObjectStore {
        ObjectStore {
            client: Client::from_conf(aws_sdk_s3::Config::builder().build()),
            bucket: "test-bucket".to_string(),
        }
    }

    #[test]
    fn test_batch_key() {
        let id = Uuid::nil();
        assert_eq!(
            store().batch_key("12345678", id),
            format!("batches/12345678/{}.json", id)
        );
    }

    #[test]
    fn test_chunk_key() {
        let id = Uuid::nil();
        assert_eq!(
            store().chunk_key("12345678", id, 7),
            format!("chunks/12345678/{}/7.json", id)
        );
    }
}
