//! Image model collaborators
//!
//! The pipeline talks to an image model through the [`ImageModel`] trait:
//! - Gemini-style `generateContent` backend (feature `gemini`)
//! - Scripted mock for tests

use crate::error::Result;
use crate::request::{EditRequest, GenerationRequest};
use crate::types::RasterImage;
use async_trait::async_trait;

#[cfg(feature = "gemini")]
pub mod gemini;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "gemini")]
pub use self::gemini::GeminiBackend;

/// What a model call handed back
///
/// Calls that "succeed" without image data are represented explicitly so the
/// pipeline can classify them as malformed instead of guessing.
#[derive(Debug, Clone)]
pub enum ModelPayload {
    /// Already-decoded pixels
    Raster(RasterImage),
    /// Container-encoded image bytes (PNG, JPEG, ...)
    Encoded {
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },
    /// The call returned no image
    Empty { reason: Option<String> },
}

/// Asynchronous image generation and editing service
///
/// Implementations own their transport, authentication and timeouts. Errors
/// are reported as-is; callers never retry on the model's behalf.
#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Produce an image from a prompt and optional references
    async fn generate(&self, request: &GenerationRequest) -> Result<ModelPayload>;

    /// Modify an existing image according to an instruction
    async fn edit(&self, request: &EditRequest) -> Result<ModelPayload>;

    /// Short name used in logs
    fn name(&self) -> &str;
}
