//! Client for the external image generation endpoint.
//!
//! Builds `generateContent` requests, applies the attempt state machine
//! from [`genbatch_core::retry`], extracts the inline image from either
//! historical response shape and classifies every failure.

pub mod client;
pub mod error;
pub mod extract;
pub mod wire;

pub use client::{GeneratedImage, GenerationClient, GenerationClientConfig, GenerationRequest, ImageGenerator};
pub use error::GenerationError;
