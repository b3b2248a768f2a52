//! S3 backend, also used for S3-compatible stores via a custom endpoint.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

use crate::{join_url, object_key, ArtifactStorage, StorageError};

pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    endpoint: Option<String>,
    public_base_url: Option<String>,
}

impl S3Storage {
    /// Build a client from the standard AWS environment (region,
    /// credentials), optionally pointed at a custom endpoint.
    pub async fn from_env(
        bucket: String,
        endpoint: Option<String>,
        public_base_url: Option<String>,
    ) -> Self {
        let shared = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket,
            endpoint,
            public_base_url,
        }
    }

    /// Public URL of `key`.
    ///
    /// Precedence: configured public base URL, then the custom endpoint in
    /// path style, then the virtual-hosted AWS URL.
    pub fn url_for(&self, key: &str) -> String {
        public_url(
            &self.bucket,
            self.endpoint.as_deref(),
            self.public_base_url.as_deref(),
            key,
        )
    }
}

fn public_url(bucket: &str, endpoint: Option<&str>, public_base_url: Option<&str>, key: &str) -> String {
    match (public_base_url, endpoint) {
        (Some(base), _) => join_url(base, key),
        (None, Some(endpoint)) => join_url(&join_url(endpoint, bucket), key),
        (None, None) => format!("https://{bucket}.s3.amazonaws.com/{key}"),
    }
}

#[async_trait]
impl ArtifactStorage for S3Storage {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let key = object_key(content_type);
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload(DisplayErrorContext(&e).to_string()))?;

        tracing::debug!(bucket = %self.bucket, key = %key, bytes = size, "Uploaded artifact to S3");
        Ok(self.url_for(&key))
    }
}
