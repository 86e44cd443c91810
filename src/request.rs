//! Generate and edit request types exchanged with the model collaborator

use crate::error::{MatteError, Result};
use crate::types::RasterImage;
use serde::{Deserialize, Serialize};

/// Maximum number of reference images a single request may carry
pub const MAX_REFERENCE_IMAGES: usize = 14;

/// Output resolution class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SizeClass {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl SizeClass {
    /// Label used on the wire and in the CLI
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SizeClass {
    type Err = MatteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "1K" => Ok(Self::OneK),
            "2K" => Ok(Self::TwoK),
            "4K" => Ok(Self::FourK),
            other => Err(MatteError::invalid_request(format!(
                "unknown size class '{}' (expected 1K, 2K or 4K)",
                other
            ))),
        }
    }
}

/// Aspect ratios accepted by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

impl AspectRatio {
    /// Every supported ratio, in display order
    pub const ALL: [AspectRatio; 10] = [
        Self::Square,
        Self::Portrait2x3,
        Self::Landscape3x2,
        Self::Portrait3x4,
        Self::Landscape4x3,
        Self::Portrait4x5,
        Self::Landscape5x4,
        Self::Portrait9x16,
        Self::Landscape16x9,
        Self::Ultrawide21x9,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait2x3 => "2:3",
            Self::Landscape3x2 => "3:2",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait4x5 => "4:5",
            Self::Landscape5x4 => "5:4",
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
            Self::Ultrawide21x9 => "21:9",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = MatteError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|ratio| ratio.as_str() == s.trim())
            .ok_or_else(|| MatteError::invalid_request(format!("unknown aspect ratio '{}'", s)))
    }
}

/// How a reference image should steer the model
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfluenceTag {
    Subject,
    Style,
    Composition,
    Palette,
    Other(String),
}

impl InfluenceTag {
    /// Short label used when describing the reference to the model
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Subject => "subject",
            Self::Style => "style",
            Self::Composition => "composition",
            Self::Palette => "palette",
            Self::Other(label) => label.as_str(),
        }
    }
}

impl std::str::FromStr for InfluenceTag {
    type Err = MatteError;

    fn from_str(s: &str) -> Result<Self> {
        let tag = match s.trim().to_ascii_lowercase().as_str() {
            "" => return Err(MatteError::invalid_request("empty influence tag")),
            "subject" => Self::Subject,
            "style" => Self::Style,
            "composition" => Self::Composition,
            "palette" => Self::Palette,
            other => Self::Other(other.to_string()),
        };
        Ok(tag)
    }
}

/// A raster passed to the model as guidance
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub image: RasterImage,
    pub influence: InfluenceTag,
    /// Influence strength in `[0, 1]`
    pub strength: f32,
}

impl ReferenceImage {
    #[must_use]
    pub fn new(image: RasterImage, influence: InfluenceTag, strength: f32) -> Self {
        Self {
            image,
            influence,
            strength,
        }
    }
}

fn validate_references(references: &[ReferenceImage]) -> Result<()> {
    if references.len() > MAX_REFERENCE_IMAGES {
        return Err(MatteError::invalid_request(format!(
            "{} reference images supplied, at most {} are allowed",
            references.len(),
            MAX_REFERENCE_IMAGES
        )));
    }
    for (index, reference) in references.iter().enumerate() {
        if !(0.0..=1.0).contains(&reference.strength) {
            return Err(MatteError::invalid_request(format!(
                "reference {} strength {} is outside [0, 1]",
                index, reference.strength
            )));
        }
        if reference.image.is_empty() {
            return Err(MatteError::invalid_request(format!(
                "reference {} is an empty raster",
                index
            )));
        }
    }
    Ok(())
}

/// A request for a brand-new image
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub references: Vec<ReferenceImage>,
    pub size: SizeClass,
    pub aspect_ratio: AspectRatio,
    pub model: String,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            references: Vec::new(),
            size: SizeClass::default(),
            aspect_ratio: AspectRatio::default(),
            model: model.into(),
        }
    }

    #[must_use]
    pub fn with_reference(mut self, reference: ReferenceImage) -> Self {
        self.references.push(reference);
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: SizeClass) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    /// Same request with a different prompt
    #[must_use]
    pub fn with_prompt<S: Into<String>>(&self, prompt: S) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }

    /// Check reference count, strengths and prompt presence
    ///
    /// # Errors
    /// - Empty prompt or model identifier
    /// - More than [`MAX_REFERENCE_IMAGES`] references, or a strength outside `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(MatteError::invalid_request("prompt text is empty"));
        }
        if self.model.trim().is_empty() {
            return Err(MatteError::invalid_request("model identifier is empty"));
        }
        validate_references(&self.references)
    }
}

/// A request to derive a new image from an existing one
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub source: RasterImage,
    pub instruction: String,
    pub references: Vec<ReferenceImage>,
    pub size: SizeClass,
    pub aspect_ratio: AspectRatio,
    pub model: String,
}

impl EditRequest {
    /// Build an edit that keeps the size controls of `template`
    #[must_use]
    pub fn from_generation<S: Into<String>>(
        source: RasterImage,
        instruction: S,
        template: &GenerationRequest,
    ) -> Self {
        Self {
            source,
            instruction: instruction.into(),
            references: Vec::new(),
            size: template.size,
            aspect_ratio: template.aspect_ratio,
            model: template.model.clone(),
        }
    }

    /// # Errors
    /// - Empty source raster or instruction
    /// - Reference constraints as in [`GenerationRequest::validate`]
    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(MatteError::invalid_request("edit source raster is empty"));
        }
        if self.instruction.trim().is_empty() {
            return Err(MatteError::invalid_request("edit instruction is empty"));
        }
        validate_references(&self.references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelLayout, Provenance};

    fn reference(strength: f32) -> ReferenceImage {
        ReferenceImage::new(
            RasterImage::filled(2, 2, PixelLayout::Rgb8, &[9, 9, 9], Provenance::External),
            InfluenceTag::Style,
            strength,
        )
    }

    #[test]
    fn test_generation_request_validation() {
        let request = GenerationRequest::new("a red fox", "model-a");
        assert!(request.validate().is_ok());

        let empty = GenerationRequest::new("   ", "model-a");
        assert!(matches!(empty.validate(), Err(MatteError::InvalidRequest(_))));
    }

    #[test]
    fn test_reference_cap_is_enforced() {
        let mut request = GenerationRequest::new("a red fox", "model-a");
        for _ in 0..MAX_REFERENCE_IMAGES {
            request = request.with_reference(reference(0.5));
        }
        assert!(request.validate().is_ok());

        let request = request.with_reference(reference(0.5));
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("at most 14"));
    }

    #[test]
    fn test_reference_strength_range() {
        let ok = GenerationRequest::new("fox", "m").with_reference(reference(1.0));
        assert!(ok.validate().is_ok());

        let bad = GenerationRequest::new("fox", "m").with_reference(reference(1.5));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_size_and_aspect_parsing() {
        assert_eq!("2k".parse::<SizeClass>().unwrap(), SizeClass::TwoK);
        assert!("8K".parse::<SizeClass>().is_err());
        assert_eq!(
            "16:9".parse::<AspectRatio>().unwrap(),
            AspectRatio::Landscape16x9
        );
        assert!("7:1".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn test_size_class_serde_labels() {
        let json = serde_json::to_string(&SizeClass::FourK).unwrap();
        assert_eq!(json, "\"4K\"");
        let ratio: AspectRatio = serde_json::from_str("\"21:9\"").unwrap();
        assert_eq!(ratio, AspectRatio::Ultrawide21x9);
    }

    #[test]
    fn test_edit_inherits_size_controls() {
        let template = GenerationRequest::new("fox", "model-b")
            .with_size(SizeClass::TwoK)
            .with_aspect_ratio(AspectRatio::Portrait3x4);
        let source = RasterImage::filled(4, 4, PixelLayout::Rgb8, &[255, 255, 255], Provenance::Generated);
        let edit = EditRequest::from_generation(source, "make it black", &template);
        assert_eq!(edit.size, SizeClass::TwoK);
        assert_eq!(edit.aspect_ratio, AspectRatio::Portrait3x4);
        assert_eq!(edit.model, "model-b");
        assert!(edit.validate().is_ok());
    }
}
