//! Dimension reconciliation between the primary render and its edited twin
//!
//! The edit call is not guaranteed to preserve pixel dimensions. The primary
//! raster is the dimension authority; a mismatched secondary is resampled to it.

use crate::config::ResampleFilter;
use crate::error::{MatteError, Result};
use crate::types::{PixelLayout, Provenance, RasterImage};
use image::{ImageBuffer, Rgb, Rgba};
use tracing::warn;

/// Outcome of reconciling a secondary raster against the primary
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// Secondary raster, at the primary's dimensions
    pub image: RasterImage,
    /// Dimensions the secondary arrived with
    pub original_dimensions: (u32, u32),
    /// Whether the raster was resampled
    pub resampled: bool,
}

/// Size `secondary` to match `primary`
///
/// Matching inputs are returned untouched (same buffer, no resample). Otherwise
/// the secondary is resampled with `filter` and a quality warning is logged:
/// resampling blur along subject edges reads as partial transparency downstream.
///
/// # Errors
/// - Either raster is zero-sized while the sizes differ
pub fn reconcile(
    primary: &RasterImage,
    secondary: RasterImage,
    filter: ResampleFilter,
) -> Result<Reconciled> {
    let original_dimensions = secondary.dimensions();

    if original_dimensions == primary.dimensions() {
        return Ok(Reconciled {
            image: secondary,
            original_dimensions,
            resampled: false,
        });
    }

    if primary.is_empty() || secondary.is_empty() {
        return Err(MatteError::dimension(format!(
            "cannot resample {}x{} to {}x{}",
            secondary.width(),
            secondary.height(),
            primary.width(),
            primary.height()
        )));
    }

    warn!(
        from_width = secondary.width(),
        from_height = secondary.height(),
        to_width = primary.width(),
        to_height = primary.height(),
        filter = %filter,
        "Edited raster changed dimensions; resampling, edge alpha may soften"
    );

    let image = resample(&secondary, primary.width(), primary.height(), filter)?;
    Ok(Reconciled {
        image,
        original_dimensions,
        resampled: true,
    })
}

/// Resample a raster to `width` x `height`, keeping its layout
///
/// # Errors
/// - The raster buffer does not match its declared dimensions
pub fn resample(
    raster: &RasterImage,
    width: u32,
    height: u32,
    filter: ResampleFilter,
) -> Result<RasterImage> {
    let filter_type = filter.to_image_filter();
    let data = raster.data().to_vec();

    let resized = match raster.layout() {
        PixelLayout::Rgb8 => {
            let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
                ImageBuffer::from_raw(raster.width(), raster.height(), data).ok_or_else(|| {
                    MatteError::internal("RGB buffer does not match raster dimensions")
                })?;
            image::imageops::resize(&buffer, width, height, filter_type).into_raw()
        },
        PixelLayout::Rgba8 => {
            let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
                ImageBuffer::from_raw(raster.width(), raster.height(), data).ok_or_else(|| {
                    MatteError::internal("RGBA buffer does not match raster dimensions")
                })?;
            image::imageops::resize(&buffer, width, height, filter_type).into_raw()
        },
    };

    RasterImage::new(width, height, raster.layout(), resized, Provenance::Resampled)
}
