//! Gemini-style `generateContent` image backend
//!
//! Both generation and editing go through the same endpoint; an edit is a
//! generation call whose first part is the source image.

use crate::{
    backends::{ImageModel, ModelPayload},
    config::GeminiConfig,
    error::{MatteError, Result},
    request::{AspectRatio, EditRequest, GenerationRequest, ReferenceImage, SizeClass},
    services::codec::RasterCodec,
    types::RasterImage,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    /// Inline PNG part; encoding failures are request problems, not response ones
    fn png(raster: &RasterImage) -> Result<Self> {
        let bytes = RasterCodec::encode_png(raster).map_err(|e| {
            MatteError::invalid_request(format!("image could not be encoded for upload: {}", e))
        })?;
        Ok(Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: "image/png".to_string(),
                data: STANDARD.encode(bytes),
            }),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
    image_size: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

fn reference_parts(references: &[ReferenceImage], parts: &mut Vec<Part>) -> Result<()> {
    for (index, reference) in references.iter().enumerate() {
        parts.push(Part::text(format!(
            "Reference image {}: use it for {} (strength {:.2}).",
            index + 1,
            reference.influence.label(),
            reference.strength
        )));
        parts.push(Part::png(&reference.image)?);
    }
    Ok(())
}

fn generation_config(size: SizeClass, aspect_ratio: AspectRatio) -> GenerationConfig {
    GenerationConfig {
        response_modalities: vec!["IMAGE".to_string()],
        image_config: ImageConfig {
            aspect_ratio: aspect_ratio.as_str().to_string(),
            image_size: size.as_str().to_string(),
        },
    }
}

fn user_content(parts: Vec<Part>) -> Vec<Content> {
    vec![Content {
        role: Some("user".to_string()),
        parts,
    }]
}

/// Request body for a generation call
pub(crate) fn generation_body(request: &GenerationRequest) -> Result<GenerateContentRequest> {
    let mut parts = vec![Part::text(request.prompt.clone())];
    reference_parts(&request.references, &mut parts)?;
    Ok(GenerateContentRequest {
        contents: user_content(parts),
        generation_config: generation_config(request.size, request.aspect_ratio),
    })
}

/// Request body for an edit call: source image, then instruction, then references
pub(crate) fn edit_body(request: &EditRequest) -> Result<GenerateContentRequest> {
    let mut parts = vec![
        Part::png(&request.source)?,
        Part::text(request.instruction.clone()),
    ];
    reference_parts(&request.references, &mut parts)?;
    Ok(GenerateContentRequest {
        contents: user_content(parts),
        generation_config: generation_config(request.size, request.aspect_ratio),
    })
}

/// Classify a response body
///
/// Error payloads and non-success statuses are model errors. A well-formed
/// reply without any image part becomes [`ModelPayload::Empty`], carrying the
/// finish or block reason when one was given.
pub(crate) fn parse_response(status: u16, body: &str) -> Result<ModelPayload> {
    let success = (200..300).contains(&status);

    let response: GenerateContentResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) if success => {
            return Err(MatteError::malformed(format!(
                "response body is not valid JSON: {}",
                e
            )));
        },
        Err(_) => {
            let snippet: String = body.chars().take(200).collect();
            return Err(MatteError::model(format!("HTTP {}: {}", status, snippet)));
        },
    };

    if let Some(error) = response.error {
        return Err(MatteError::model(format!(
            "{} ({}): {}",
            error.status.as_deref().unwrap_or("ERROR"),
            error.code.unwrap_or(i64::from(status)),
            error.message
        )));
    }
    if !success {
        return Err(MatteError::model(format!("HTTP {}", status)));
    }

    let mut reason = response.prompt_feedback.and_then(|f| f.block_reason);
    let mut texts = Vec::new();
    for candidate in response.candidates {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(inline) = part.inline_data {
                    let bytes = STANDARD.decode(inline.data.as_bytes()).map_err(|e| {
                        MatteError::malformed(format!("inline image data is not base64: {}", e))
                    })?;
                    return Ok(ModelPayload::Encoded {
                        bytes,
                        mime_type: Some(inline.mime_type),
                    });
                }
                if let Some(text) = part.text {
                    texts.push(text);
                }
            }
        }
        if reason.is_none() {
            reason = candidate.finish_reason;
        }
    }

    if reason.is_none() && !texts.is_empty() {
        reason = Some(texts.join(" "));
    }
    Ok(ModelPayload::Empty { reason })
}

/// HTTP client for a Gemini-compatible image endpoint
pub struct GeminiBackend {
    client: Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiBackend {
    /// Create a backend, resolving the API key from config or environment
    ///
    /// # Errors
    /// - Invalid configuration or missing API key
    /// - Failed to create the HTTP client
    pub fn new(config: GeminiConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.resolve_api_key()?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                MatteError::model_operation_error("gemini", "client setup", &e.to_string())
            })?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Endpoint URL for `model`
    #[must_use]
    pub fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    async fn call(
        &self,
        operation: &str,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<ModelPayload> {
        let url = self.endpoint(model);
        debug!(operation, %url, "Sending generateContent request");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| MatteError::model_operation_error("gemini", operation, &e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| MatteError::model_operation_error("gemini", operation, &e.to_string()))?;

        let payload = parse_response(status, &text);
        if let Err(ref e) = payload {
            warn!(operation, status, error = %e, "generateContent call failed");
        }
        payload
    }
}

#[async_trait]
impl ImageModel for GeminiBackend {
    #[instrument(level = "debug", skip_all, fields(model = %request.model, references = request.references.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<ModelPayload> {
        let body = generation_body(request)?;
        self.call("generate", &request.model, &body).await
    }

    #[instrument(level = "debug", skip_all, fields(model = %request.model))]
    async fn edit(&self, request: &EditRequest) -> Result<ModelPayload> {
        let body = edit_body(request)?;
        self.call("edit", &request.model, &body).await
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
