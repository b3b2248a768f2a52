//! Resilient HTTP client for the `generateContent` endpoint.
//!
//! Every call runs the attempt state machine from
//! [`genbatch_core::retry`]: attempt `n` gets timeout
//! `base + step * (n - 1)`, retryable failures back off by the kind-specific
//! unit times `n`, and non-retryable failures end the call immediately.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use genbatch_core::generation::{
    excess_reference_images, supports_resolution, validate_aspect_ratio, validate_prompt,
    validate_resolution, DEFAULT_MAX_REFERENCE_IMAGES,
};
use genbatch_core::job::ReferenceImage;
use genbatch_core::retry::{AttemptState, RetryPolicy};

use crate::error::GenerationError;
use crate::extract::extract_image;
use crate::wire::GenerateContentRequest;

/// Default base URL of the generation API.
pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com";

/// Header carrying the API secret.
const API_KEY_HEADER: &str = "x-goog-api-key";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for [`GenerationClient`].
///
/// | Env var                            | Default                                     |
/// |------------------------------------|---------------------------------------------|
/// | `GENERATION_API_URL`               | `https://generativelanguage.googleapis.com` |
/// | `GENERATION_TIMEOUT_MS`            | `120000`                                    |
/// | `GENERATION_MAX_ATTEMPTS`          | `3`                                         |
/// | `GENERATION_MAX_REFERENCE_IMAGES`  | `14`                                        |
#[derive(Debug, Clone)]
pub struct GenerationClientConfig {
    pub api_url: String,
    pub policy: RetryPolicy,
    pub max_reference_images: usize,
}

impl Default for GenerationClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            policy: RetryPolicy::default(),
            max_reference_images: DEFAULT_MAX_REFERENCE_IMAGES,
        }
    }
}

impl GenerationClientConfig {
    /// Load client configuration from environment variables.
    ///
    /// # Panics
    ///
    /// Panics if a numeric variable is set to a value that does not parse.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_url = std::env::var("GENERATION_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);

        let base_timeout_ms: u64 = std::env::var("GENERATION_TIMEOUT_MS")
            .unwrap_or_else(|_| defaults.policy.base_timeout.as_millis().to_string())
            .parse()
            .expect("GENERATION_TIMEOUT_MS must be a valid u64");

        let max_attempts: u32 = std::env::var("GENERATION_MAX_ATTEMPTS")
            .unwrap_or_else(|_| defaults.policy.max_attempts.to_string())
            .parse()
            .expect("GENERATION_MAX_ATTEMPTS must be a valid u32");
        assert!(max_attempts > 0, "GENERATION_MAX_ATTEMPTS must be at least 1");

        let max_reference_images: usize = std::env::var("GENERATION_MAX_REFERENCE_IMAGES")
            .unwrap_or_else(|_| defaults.max_reference_images.to_string())
            .parse()
            .expect("GENERATION_MAX_REFERENCE_IMAGES must be a valid usize");

        Self {
            api_url,
            policy: RetryPolicy {
                max_attempts,
                base_timeout: Duration::from_millis(base_timeout_ms),
                ..defaults.policy
            },
            max_reference_images,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One prompt plus the options shared by its batch.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub reference_images: &'a [ReferenceImage],
    pub model: &'a str,
    pub aspect_ratio: &'a str,
    pub resolution: Option<&'a str>,
}

/// A decoded image returned by a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Wall time across all attempts, backoff included.
    pub processing_time_ms: u64,
    pub attempts: u32,
}

/// Produces one image per prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedImage, GenerationError>;
}

// ---------------------------------------------------------------------------
// GenerationClient
// ---------------------------------------------------------------------------

/// HTTP implementation of [`ImageGenerator`].
pub struct GenerationClient {
    http: reqwest::Client,
    config: GenerationClientConfig,
}

impl GenerationClient {
    pub fn new(config: GenerationClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.config.api_url)
    }

    /// Check the prompt and options, returning the output size to send.
    fn prepare<'r>(&self, request: &GenerationRequest<'r>) -> Result<Option<&'r str>, GenerationError> {
        validate_prompt(request.prompt).map_err(|e| GenerationError::validation(e.to_string()))?;
        validate_aspect_ratio(request.aspect_ratio)
            .map_err(|e| GenerationError::validation(e.to_string()))?;

        if let Some(excess) = excess_reference_images(
            request.reference_images.len(),
            self.config.max_reference_images,
        ) {
            tracing::warn!(
                count = request.reference_images.len(),
                max = self.config.max_reference_images,
                excess,
                "Reference image count exceeds the recommended maximum",
            );
        }

        let Some(resolution) = request.resolution else {
            return Ok(None);
        };
        validate_resolution(resolution).map_err(|e| GenerationError::validation(e.to_string()))?;
        if supports_resolution(request.model) {
            Ok(Some(resolution))
        } else {
            tracing::debug!(
                model = request.model,
                resolution,
                "Model does not support explicit resolution, ignoring",
            );
            Ok(None)
        }
    }

    /// Perform one HTTP attempt under `timeout`.
    async fn attempt(
        &self,
        api_key: &str,
        model: &str,
        body: &GenerateContentRequest<'_>,
        timeout: Duration,
    ) -> Result<GeneratedImage, GenerationError> {
        let timeout_ms = timeout.as_millis() as u64;

        let response = self
            .http
            .post(self.endpoint(model))
            .header(API_KEY_HEADER, api_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::from_transport(&e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::from_status(status.as_u16(), &body));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::from_transport(&e, timeout_ms))?;

        let image = extract_image(&value)?;
        let bytes = BASE64_STANDARD
            .decode(image.data.as_bytes())
            .map_err(|e| GenerationError::empty_result(format!("Image data is not valid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(GenerationError::empty_result("Image data decoded to zero bytes"));
        }

        Ok(GeneratedImage {
            bytes,
            mime_type: image.mime_type,
            processing_time_ms: 0,
            attempts: 0,
        })
    }
}

#[async_trait]
impl ImageGenerator for GenerationClient {
    async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedImage, GenerationError> {
        let image_size = self.prepare(request)?;
        let body = GenerateContentRequest::new(
            request.prompt,
            request
                .reference_images
                .iter()
                .map(|img| (img.mime_type.as_str(), img.data.as_str())),
            request.aspect_ratio,
            image_size,
        );

        let policy = &self.config.policy;
        let started = Instant::now();
        let mut state = AttemptState::start();
        let mut last_error: Option<GenerationError> = None;

        loop {
            state = match state {
                AttemptState::Attempting(attempt) => {
                    let timeout = policy.timeout_for(attempt);
                    tracing::debug!(
                        model = request.model,
                        attempt,
                        timeout_ms = timeout.as_millis() as u64,
                        "Sending generation request",
                    );

                    match self.attempt(api_key, request.model, &body, timeout).await {
                        Ok(mut image) => {
                            image.processing_time_ms = started.elapsed().as_millis() as u64;
                            image.attempts = attempt;
                            tracing::debug!(
                                attempt,
                                bytes = image.bytes.len(),
                                mime_type = %image.mime_type,
                                processing_time_ms = image.processing_time_ms,
                                "Generation succeeded",
                            );
                            return Ok(image);
                        }
                        Err(err) => {
                            let next = policy.on_failure(attempt, err.kind);
                            if let AttemptState::Retrying { delay, .. } = next {
                                tracing::warn!(
                                    attempt,
                                    kind = %err.kind,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %err.message,
                                    "Generation attempt failed, retrying",
                                );
                            }
                            last_error = Some(err);
                            next
                        }
                    }
                }
                AttemptState::Retrying { next_attempt, delay } => {
                    tokio::time::sleep(delay).await;
                    AttemptState::Attempting(next_attempt)
                }
                AttemptState::Failed { kind, attempts } => {
                    let err = last_error
                        .unwrap_or_else(|| GenerationError::new(kind, "Generation failed"));
                    tracing::warn!(
                        attempts,
                        kind = %err.kind,
                        error = %err.message,
                        "Generation failed",
                    );
                    return Err(err);
                }
            };
        }
    }
}
