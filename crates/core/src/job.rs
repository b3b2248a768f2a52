//! Queue payload for one batch submission.
//!
//! The submission layer serialises a [`GenerationJob`] as camelCase JSON
//! and enqueues it; the worker deserialises it on every delivery. The
//! `execution_id` doubles as the queue de-duplication key.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::CoreError;

/// One queued unit of work representing an entire batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub client_id: Uuid,
    pub user_id: Uuid,
    #[validate(nested)]
    pub input_data: JobInput,
    #[validate(nested)]
    pub config: JobConfig,
}

/// Prompts plus the reference images shared by every prompt in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    #[validate(length(min = 1, message = "a batch needs at least one prompt"))]
    pub prompts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_images: Option<Vec<ReferenceImage>>,
}

/// A base64 image payload. Lives only as long as the job does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub data: String,
    pub mime_type: String,
}

/// Generation options applied to every prompt in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub credential_ref: Uuid,
    #[validate(length(min = 1, message = "model must not be empty"))]
    pub model: String,
    #[validate(length(min = 1, message = "aspect ratio must not be empty"))]
    pub aspect_ratio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl GenerationJob {
    /// Parse and validate a raw queue payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, CoreError> {
        let job: Self = serde_json::from_value(payload.clone())
            .map_err(|e| CoreError::Validation(format!("Malformed job payload: {e}")))?;
        job.validate()
            .map_err(|e| CoreError::Validation(format!("Invalid job payload: {e}")))?;
        Ok(job)
    }

    pub fn prompt_count(&self) -> usize {
        self.input_data.prompts.len()
    }

    pub fn reference_images(&self) -> &[ReferenceImage] {
        self.input_data.reference_images.as_deref().unwrap_or(&[])
    }
}
