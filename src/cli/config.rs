//! Conversion from CLI arguments to library requests

use crate::cli::main_impl::GenerateArgs;
use crate::{
    config::DualmatteConfig,
    error::MatteError,
    request::{GenerationRequest, InfluenceTag, ReferenceImage},
    services::RasterCodec,
};
use anyhow::{Context, Result};
use std::path::PathBuf;

const DEFAULT_REFERENCE_STRENGTH: f32 = 1.0;

/// A `--reference path[:tag[:strength]]` argument
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpec {
    pub path: PathBuf,
    pub influence: InfluenceTag,
    pub strength: f32,
}

impl std::str::FromStr for ReferenceSpec {
    type Err = MatteError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let path = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| {
            MatteError::invalid_request(format!("reference '{}' has no path", s))
        })?;
        let influence = match parts.next() {
            Some(tag) => tag.parse()?,
            None => InfluenceTag::Subject,
        };
        let strength = match parts.next() {
            Some(value) => value.parse::<f32>().map_err(|_| {
                MatteError::invalid_request(format!(
                    "reference strength '{}' is not a number",
                    value
                ))
            })?,
            None => DEFAULT_REFERENCE_STRENGTH,
        };
        Ok(Self {
            path: PathBuf::from(path),
            influence,
            strength,
        })
    }
}

/// Convert CLI arguments to library requests
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the batch template from `generate` arguments
    pub(crate) fn generation_request(
        args: &GenerateArgs,
        config: &DualmatteConfig,
    ) -> Result<GenerationRequest> {
        let model = args
            .model
            .clone()
            .unwrap_or_else(|| config.gemini.default_model.clone());

        let mut request = GenerationRequest::new(args.prompt.clone(), model)
            .with_size(args.size)
            .with_aspect_ratio(args.aspect);

        for reference in &args.references {
            let image = RasterCodec::load(&reference.path).with_context(|| {
                format!("Failed to load reference image {}", reference.path.display())
            })?;
            request = request.with_reference(ReferenceImage::new(
                image,
                reference.influence.clone(),
                reference.strength,
            ));
        }

        request.validate().context("Invalid generation request")?;
        Ok(request)
    }
}
