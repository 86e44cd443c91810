//! Configuration types for pipelines, batches and backends

use crate::error::{MatteError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest possible RGB distance between pure white and pure black, `sqrt(3 * 255^2)`
pub const MAX_RGB_DISTANCE: f32 = 441.67;

/// Prompt directive appended to every transparent generation
pub const DEFAULT_WHITE_BACKGROUND_DIRECTIVE: &str =
    "Place the subject on a solid, pure white (#FFFFFF) background with no shadows, gradients or texture.";

/// Edit instruction that produces the black-background twin
pub const DEFAULT_BLACK_BACKGROUND_INSTRUCTION: &str =
    "Change only the background to pure solid black (#000000). Do not alter the subject in any way: keep its shape, position, colors, lighting and every detail identical.";

/// Resampling filter used by the dimension reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleFilter {
    /// Bilinear interpolation
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom) interpolation
    CatmullRom,
    /// Lanczos with a window of 3
    Lanczos3,
}

impl ResampleFilter {
    #[must_use]
    pub fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl std::fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Triangle => write!(f, "triangle"),
            Self::CatmullRom => write!(f, "catmull-rom"),
            Self::Lanczos3 => write!(f, "lanczos3"),
        }
    }
}

/// Parameters of the alpha recovery heuristic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Distance treated as fully transparent
    pub max_distance: f32,
    /// Alpha at or below which the recovered color is forced to black
    pub min_alpha: f32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_distance: MAX_RGB_DISTANCE,
            min_alpha: 0.01,
        }
    }
}

impl RecoveryConfig {
    /// # Errors
    /// - `max_distance` not positive, or `min_alpha` outside `[0, 1)`
    pub fn validate(&self) -> Result<()> {
        if !(self.max_distance > 0.0 && self.max_distance.is_finite()) {
            return Err(MatteError::config_value_error(
                "max_distance",
                self.max_distance,
                "> 0",
            ));
        }
        if !(0.0..1.0).contains(&self.min_alpha) {
            return Err(MatteError::config_value_error(
                "min_alpha",
                self.min_alpha,
                "0.0-1.0 (exclusive)",
            ));
        }
        Ok(())
    }
}

/// Configuration for one transparent-asset pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Appended to the caller's prompt for the primary (white) generation
    pub white_background_directive: String,
    /// Instruction sent with the background swap edit
    pub black_background_instruction: String,
    /// Alpha recovery parameters
    pub recovery: RecoveryConfig,
    /// Filter used when the edit changes pixel dimensions
    pub resample_filter: ResampleFilter,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            white_background_directive: DEFAULT_WHITE_BACKGROUND_DIRECTIVE.to_string(),
            black_background_instruction: DEFAULT_BLACK_BACKGROUND_INSTRUCTION.to_string(),
            recovery: RecoveryConfig::default(),
            resample_filter: ResampleFilter::default(),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// The prompt sent for the primary render
    #[must_use]
    pub fn white_background_prompt(&self, prompt: &str) -> String {
        if self.white_background_directive.is_empty() {
            return prompt.to_string();
        }
        format!("{}\n\n{}", prompt.trim_end(), self.white_background_directive)
    }

    /// # Errors
    /// - Empty background swap instruction
    /// - Invalid recovery parameters
    pub fn validate(&self) -> Result<()> {
        if self.black_background_instruction.trim().is_empty() {
            return Err(MatteError::invalid_config(
                "black background instruction must not be empty",
            ));
        }
        self.recovery.validate()
    }
}

/// Builder for `PipelineConfig`
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    #[must_use]
    pub fn white_background_directive<S: Into<String>>(mut self, directive: S) -> Self {
        self.config.white_background_directive = directive.into();
        self
    }

    #[must_use]
    pub fn black_background_instruction<S: Into<String>>(mut self, instruction: S) -> Self {
        self.config.black_background_instruction = instruction.into();
        self
    }

    #[must_use]
    pub fn recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.config.recovery = recovery;
        self
    }

    #[must_use]
    pub fn resample_filter(mut self, filter: ResampleFilter) -> Self {
        self.config.resample_filter = filter;
        self
    }

    /// # Errors
    /// - Configuration validation failures
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the batch scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Largest batch a caller may request
    pub max_batch_size: usize,
    /// Settings shared by every slot's pipeline
    pub pipeline: PipelineConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl BatchConfig {
    /// # Errors
    /// - `max_batch_size` outside 1-64
    /// - Invalid pipeline settings
    pub fn validate(&self) -> Result<()> {
        if !(1..=64).contains(&self.max_batch_size) {
            return Err(MatteError::config_value_error(
                "max_batch_size",
                self.max_batch_size,
                "1-64",
            ));
        }
        self.pipeline.validate()
    }

    /// Check a requested slot count against the configured bound
    ///
    /// # Errors
    /// - `count` is zero or above `max_batch_size`
    pub fn check_count(&self, count: usize) -> Result<()> {
        if count == 0 || count > self.max_batch_size {
            return Err(MatteError::config_value_error(
                "batch count",
                count,
                &format!("1-{}", self.max_batch_size),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the HTTP model backend
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key; falls back to `GEMINI_API_KEY` when absent
    pub api_key: Option<String>,
    /// Base URL up to and including the API version segment
    pub base_url: String,
    /// Model used when a request does not name one
    pub default_model: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            default_model: "gemini-2.5-flash-image".to_string(),
            timeout_secs: 180,
        }
    }
}

impl GeminiConfig {
    /// Environment variable consulted when no key is configured
    pub const API_KEY_ENV: &'static str = "GEMINI_API_KEY";

    /// Configured key, or the environment variable
    ///
    /// # Errors
    /// - No key configured and the environment variable is unset or empty
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.clone());
        }
        match std::env::var(Self::API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(MatteError::invalid_config(format!(
                "no API key configured; set {} or add api_key to the config file",
                Self::API_KEY_ENV
            ))),
        }
    }

    /// # Errors
    /// - Empty base URL or zero timeout
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(MatteError::invalid_config("base_url must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(MatteError::config_value_error(
                "timeout_secs",
                self.timeout_secs,
                ">= 1",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualmatteConfig {
    pub batch: BatchConfig,
    pub gemini: GeminiConfig,
}

impl DualmatteConfig {
    /// Default location: `<config dir>/dualmatte/config.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dualmatte").join("config.json"))
    }

    /// Parse and validate a JSON configuration document
    ///
    /// # Errors
    /// - Invalid JSON or validation failures
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MatteError::invalid_config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    ///
    /// # Errors
    /// - File read failures, invalid JSON or validation failures
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("Failed to read config '{}': {}", path.as_ref().display(), e),
            )
        })?;
        Self::from_json(&content)
    }

    /// Load from `path`, else the default location if it exists, else defaults
    ///
    /// # Errors
    /// - An explicitly given file that can't be loaded
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(default),
            _ => Ok(Self::default()),
        }
    }

    /// # Errors
    /// - Batch or backend validation failures
    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        self.gemini.validate()
    }
}
