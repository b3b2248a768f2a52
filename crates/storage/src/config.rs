//! Backend selection and settings.

use std::path::PathBuf;
use std::sync::Arc;

use crate::{ArtifactStorage, LocalStorage, S3Storage, StorageError};

/// Default directory of the local backend.
const DEFAULT_LOCAL_DIR: &str = "./storage";

// ---------------------------------------------------------------------------
// StorageBackendType
// ---------------------------------------------------------------------------

/// Where generated artifacts are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendType {
    Local,
    S3,
}

impl StorageBackendType {
    /// Parse from the `STORAGE_BACKEND` value.
    pub fn from_name(name: &str) -> Result<Self, StorageError> {
        match name {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => Err(StorageError::Config(format!(
                "Unknown storage backend type '{other}'. Must be one of: local, s3"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackendType,
    /// Required for the S3 backend.
    pub bucket: Option<String>,
    /// Custom endpoint for S3-compatible stores. Enables path-style URLs.
    pub endpoint: Option<String>,
    /// Prefix of the URLs handed out for uploaded artifacts.
    pub public_base_url: Option<String>,
    pub local_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendType::Local,
            bucket: None,
            endpoint: None,
            public_base_url: None,
            local_dir: PathBuf::from(DEFAULT_LOCAL_DIR),
        }
    }
}

impl StorageConfig {
    /// Load storage configuration from environment variables.
    ///
    /// | Env Var                    | Required      | Default     |
    /// |----------------------------|---------------|-------------|
    /// | `STORAGE_BACKEND`          | no            | `local`     |
    /// | `S3_BUCKET`                | if `s3`       | --          |
    /// | `S3_ENDPOINT`              | no            | AWS         |
    /// | `STORAGE_PUBLIC_BASE_URL`  | no            | per backend |
    /// | `STORAGE_LOCAL_DIR`        | no            | `./storage` |
    ///
    /// Region and credentials for S3 come from the standard AWS variables.
    pub fn from_env() -> Result<Self, StorageError> {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let backend = match non_empty("STORAGE_BACKEND") {
            Some(name) => StorageBackendType::from_name(name.trim())?,
            None => StorageBackendType::Local,
        };

        let config = Self {
            backend,
            bucket: non_empty("S3_BUCKET"),
            endpoint: non_empty("S3_ENDPOINT"),
            public_base_url: non_empty("STORAGE_PUBLIC_BASE_URL"),
            local_dir: non_empty("STORAGE_LOCAL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the selected backend has everything it needs.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.backend == StorageBackendType::S3 && self.bucket.is_none() {
            return Err(StorageError::Config(
                "S3_BUCKET must be set when STORAGE_BACKEND=s3".into(),
            ));
        }
        Ok(())
    }

    /// Build the configured backend.
    pub async fn connect(&self) -> Result<Arc<dyn ArtifactStorage>, StorageError> {
        self.validate()?;
        tracing::info!(backend = self.backend.name(), "Initialising artifact storage");

        match self.backend {
            StorageBackendType::Local => Ok(Arc::new(LocalStorage::new(
                self.local_dir.clone(),
                self.public_base_url.clone(),
            ))),
            StorageBackendType::S3 => {
                let bucket = self
                    .bucket
                    .clone()
                    .ok_or_else(|| StorageError::Config("S3 bucket missing".into()))?;
                Ok(Arc::new(
                    S3Storage::from_env(bucket, self.endpoint.clone(), self.public_base_url.clone())
                        .await,
                ))
            }
        }
    }
}
