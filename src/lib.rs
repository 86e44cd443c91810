#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # dualmatte
//!
//! Transparent asset extraction for generative image models that only emit fully
//! opaque rasters.
//!
//! The same subject is requested twice: once over pure white, then (through an edit
//! call on the first render) over pure black. Per-pixel alpha and true foreground
//! color are recovered from the difference between the two renders.
//!
//! ## Features
//!
//! - **Dual-composite alpha recovery**: straight-alpha RGBA from a white/black pair
//! - **Dimension reconciliation**: edited renders that drift in size are resampled
//! - **Slot lifecycle**: every request is a forward-only state machine with a recorded trace
//! - **Concurrent batches**: K variants race as cooperative futures; failures stay local
//! - **Two-tier cancellation**: per-slot soft cancel and batch-wide hard abort
//! - **HTTP backend**: Gemini-style `generateContent` client (`gemini` feature)
//! - **CLI Integration**: Optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dualmatte::{
//!     BatchConfig, BatchScheduler, GeminiBackend, GeminiConfig, GenerationRequest,
//!     TracingProgressReporter,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = GeminiBackend::new(GeminiConfig::default())?;
//! let scheduler = BatchScheduler::new(Arc::new(backend), BatchConfig::default())?;
//!
//! let template = GenerationRequest::new("a brass telescope", "gemini-2.5-flash-image");
//! let (handle, batch) = scheduler.prepare(template, 4, true)?;
//!
//! // `handle.abort()` from anywhere aborts every in-flight request
//! let report = batch.run(Arc::new(TracingProgressReporter::new(false))).await;
//! for asset in &report.assets {
//!     dualmatte::RasterCodec::save_png(&asset.image, format!("asset-{}.png", asset.ordinal))?;
//! }
//! # drop(handle);
//! # Ok(())
//! # }
//! ```
//!
//! ## Offline Recovery
//!
//! ```rust,no_run
//! use dualmatte::{recover_alpha, RasterCodec};
//!
//! # fn example() -> dualmatte::Result<()> {
//! let white = RasterCodec::load("white.png")?;
//! let black = RasterCodec::load("black.png")?;
//! let asset = recover_alpha(&white, &black)?;
//! RasterCodec::save_png(&asset, "asset.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `gemini` (default): HTTP model backend
//! - `parallel` (default): row-parallel alpha recovery with rayon
//! - `cli` (default): Command-line interface and progress reporting (optional for library usage)
//! - `tracing-json`: JSON log output for the CLI
//! - `webp-support`: WebP decoding of model payloads and files

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositing;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod scheduler;
pub mod services;
pub mod slot;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

use std::sync::Arc;

// Public API exports
pub use backends::{ImageModel, ModelPayload};
#[cfg(feature = "gemini")]
pub use backends::GeminiBackend;
pub use compositing::{composite_over, recover_alpha, recover_alpha_with, reconcile, Reconciled};
pub use config::{
    BatchConfig, DualmatteConfig, GeminiConfig, PipelineConfig, PipelineConfigBuilder,
    RecoveryConfig, ResampleFilter,
};
pub use error::{ErrorKind, MatteError, Result};
pub use pipeline::{PipelineRun, SlotContext, TransparentAssetPipeline};
pub use request::{
    AspectRatio, EditRequest, GenerationRequest, InfluenceTag, ReferenceImage, SizeClass,
};
pub use scheduler::{BatchHandle, BatchReport, BatchScheduler, PreparedBatch, SlotFailure};
pub use services::{
    BatchTally, ChannelProgressReporter, NoOpProgressReporter, ProgressEvent, ProgressReporter,
    ProgressTracker, ProgressUpdate, RasterCodec, SlotOutcome, SlotSettlement,
    TracingProgressReporter,
};
pub use slot::{PipelineMode, SlotError, SlotLifecycle, SlotRecord, SlotState};
pub use types::{PixelLayout, Provenance, RasterImage, SlotId, TransparentAsset};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat};

/// Recover a transparent asset from two encoded renders
///
/// `white` and `black` are image files in any enabled container format. The black
/// render is resampled to the white one's dimensions if they differ.
///
/// # Examples
///
/// ```rust,no_run
/// use dualmatte::{recover_from_bytes, PipelineConfig, RasterCodec};
///
/// # fn example(white: Vec<u8>, black: Vec<u8>) -> dualmatte::Result<()> {
/// let asset = recover_from_bytes(&white, &black, &PipelineConfig::default())?;
/// let png = RasterCodec::encode_png(&asset)?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - Either buffer fails to decode
/// - Either render is zero-sized
pub fn recover_from_bytes(
    white: &[u8],
    black: &[u8],
    config: &PipelineConfig,
) -> Result<RasterImage> {
    let white = RasterCodec::decode(white, Provenance::External)?;
    let black = RasterCodec::decode(black, Provenance::External)?;
    let reconciled = reconcile(&white, black, config.resample_filter)?;
    recover_alpha_with(&white, &reconciled.image, &config.recovery)
}

/// Run a one-shot batch with default configuration and no progress reporting
///
/// # Errors
/// - `count` is out of bounds or the template is invalid
pub async fn generate_assets(
    model: Arc<dyn ImageModel>,
    template: GenerationRequest,
    count: usize,
    transparent: bool,
) -> Result<BatchReport> {
    let scheduler = BatchScheduler::new(model, BatchConfig::default())?;
    scheduler
        .run_batch(template, count, transparent, Arc::new(NoOpProgressReporter))
        .await
}
