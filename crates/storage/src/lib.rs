//! Artifact storage for generated images.
//!
//! Each upload gets a fresh key `generated/{uuid-v7}.{ext}` and resolves to
//! the public URL stored on the batch result.

pub mod config;
pub mod local;
pub mod s3;

use async_trait::async_trait;
use uuid::Uuid;

pub use config::{StorageBackendType, StorageConfig};
pub use local::LocalStorage;
pub use s3::S3Storage;

/// Key prefix of every generated artifact.
pub const KEY_PREFIX: &str = "generated";

/// Errors from storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Invalid storage configuration: {0}")]
    Config(String),
}

/// Persists generated artifacts and returns their public URL.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError>;
}

/// File extension for an image MIME type. Unknown types fall back to `bin`.
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        "image/heif" => "heif",
        _ => "bin",
    }
}

/// Fresh, time-ordered object key for an artifact of `content_type`.
pub fn object_key(content_type: &str) -> String {
    format!("{KEY_PREFIX}/{}.{}", Uuid::now_v7(), extension_for(content_type))
}

/// Join a base URL and an object key with exactly one slash.
pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}
