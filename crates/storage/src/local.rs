//! Local-filesystem backend, for development and single-host deployments.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::{join_url, object_key, ArtifactStorage, StorageError};

/// Writes artifacts below a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalStorage {
    pub fn new(root: PathBuf, public_base_url: Option<String>) -> Self {
        Self {
            root,
            public_base_url,
        }
    }

    /// URL for `key`: below the public base URL when one is configured,
    /// otherwise a `file://` URL of the written path.
    fn url_for(&self, key: &str, path: &std::path::Path) -> String {
        match &self.public_base_url {
            Some(base) => join_url(base, key),
            None => format!("file://{}", path.display()),
        }
    }
}

#[async_trait]
impl ArtifactStorage for LocalStorage {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let key = object_key(content_type);
        let path = self.root.join(&key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        tracing::debug!(key = %key, bytes = bytes.len(), "Stored artifact locally");
        Ok(self.url_for(&key, &path))
    }
}
