//! Personalized story generation.
//!
//! A story is produced by a fixed chain of steps, each of which degrades to a documented fallback
//! instead of failing the request:
//!
//! 1. [`characters`] builds the character reference for the child and family. Photos are
//!    described by [`photo_analyzer`]; a failed description becomes a templated one.
//! 2. [`narrative`] makes one structured text-model call. Errors and unusable output become the
//!    fallback story.
//! 3. [`illustrations`] renders every scene concurrently. A failed scene gets the placeholder URL.
//!
//! [`pipeline`] runs the chain. The model providers sit behind the [`TextModel`], [`VisionModel`]
//! and [`ImageModel`] traits; [`client::OpenAiClient`] implements all three against an
//! OpenAI-compatible API.

pub mod characters;
pub mod client;
pub mod illustrations;
pub mod narrative;
pub mod photo_analyzer;
pub mod pipeline;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single upstream model call
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request to model API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("model API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("invalid JSON from model: {0}")]
    Json(#[from] serde_json::Error),
}

/// Text returned by a chat completion, with usage accounting
#[derive(Debug, Clone, PartialEq)]
pub struct TextCompletion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

/// An image to be described
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    pub content_type: &'a str,
    pub data: &'a [u8],
}

/// Chat model constrained to answer with a JSON object
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete_json(&self, system: &str, prompt: &str) -> Result<TextCompletion, GenerationError>;
}

/// Vision-capable chat model
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe_image(&self, system: &str, prompt: &str, image: ImageInput<'_>) -> Result<String, GenerationError>;
}

/// Image generation model returning a hosted image URL
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn generate_image(&self, prompt: &str) -> Result<String, GenerationError>;
}
