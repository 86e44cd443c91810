//! Dual-composite alpha recovery.
//!
//! The model renders the same subject twice, over white and over black. Under
//! standard compositing `observed = alpha * F + (1 - alpha) * Bg`, so a pixel
//! that renders identically on both backgrounds is opaque foreground and a pixel
//! that renders as pure white vs pure black is background.
//!
//! Alpha is estimated from the Euclidean RGB distance between the two samples,
//! and straight color is recovered from the black sample, where `Cblack = alpha * F`.

use crate::config::RecoveryConfig;
use crate::error::{MatteError, Result};
use crate::types::{PixelLayout, Provenance, RasterImage};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Recover one straight-alpha RGBA pixel from a white/black sample pair
#[must_use]
pub fn recover_pixel(white: [u8; 3], black: [u8; 3], config: &RecoveryConfig) -> [u8; 4] {
    let dr = f32::from(white[0]) - f32::from(black[0]);
    let dg = f32::from(white[1]) - f32::from(black[1]);
    let db = f32::from(white[2]) - f32::from(black[2]);
    let distance = (dr * dr + dg * dg + db * db).sqrt();

    let alpha = (1.0 - distance / config.max_distance).clamp(0.0, 1.0);

    let mut out = [0u8; 4];
    if alpha > config.min_alpha {
        for (dst, &src) in out.iter_mut().zip(black.iter()) {
            *dst = (f32::from(src) / alpha).clamp(0.0, 255.0).round() as u8;
        }
    }
    out[3] = (alpha * 255.0).round() as u8;
    out
}

fn check_pair(white: &RasterImage, black: &RasterImage) -> Result<()> {
    if white.is_empty() || black.is_empty() {
        return Err(MatteError::dimension(format!(
            "alpha recovery needs non-empty rasters, got {}x{} and {}x{}",
            white.width(),
            white.height(),
            black.width(),
            black.height()
        )));
    }
    if white.dimensions() != black.dimensions() {
        return Err(MatteError::dimension(format!(
            "alpha recovery needs equal dimensions, got {}x{} (white) and {}x{} (black)",
            white.width(),
            white.height(),
            black.width(),
            black.height()
        )));
    }
    Ok(())
}

fn recover_row(
    out: &mut [u8],
    white_row: &[u8],
    white_channels: usize,
    black_row: &[u8],
    black_channels: usize,
    config: &RecoveryConfig,
) {
    let pixels = out
        .chunks_exact_mut(4)
        .zip(white_row.chunks_exact(white_channels))
        .zip(black_row.chunks_exact(black_channels));

    for ((dst, w), b) in pixels {
        let rgba = recover_pixel([w[0], w[1], w[2]], [b[0], b[1], b[2]], config);
        dst.copy_from_slice(&rgba);
    }
}

/// Recover a transparent foreground using the default heuristic parameters
///
/// # Errors
/// - Either raster is zero-sized, or their dimensions differ
pub fn recover_alpha(white: &RasterImage, black: &RasterImage) -> Result<RasterImage> {
    recover_alpha_with(white, black, &RecoveryConfig::default())
}

/// Recover a transparent foreground from a white/black render pair
///
/// Both inputs may be RGB or RGBA; any input alpha channel is ignored. The
/// output is always RGBA with straight (unpremultiplied) color. No resampling
/// happens here: size the pair with the reconciler first.
///
/// # Errors
/// - Either raster is zero-sized, or their dimensions differ
#[tracing::instrument(level = "debug", skip_all, fields(width = white.width(), height = white.height()))]
pub fn recover_alpha_with(
    white: &RasterImage,
    black: &RasterImage,
    config: &RecoveryConfig,
) -> Result<RasterImage> {
    check_pair(white, black)?;

    let (width, height) = white.dimensions();
    let white_channels = white.layout().channels();
    let black_channels = black.layout().channels();
    let out_stride = width as usize * 4;
    let mut out = vec![0u8; out_stride * height as usize];

    #[cfg(feature = "parallel")]
    out.par_chunks_mut(out_stride)
        .zip(white.data().par_chunks(white.row_stride()))
        .zip(black.data().par_chunks(black.row_stride()))
        .for_each(|((row, w), b)| {
            recover_row(row, w, white_channels, b, black_channels, config);
        });

    #[cfg(not(feature = "parallel"))]
    for ((row, w), b) in out
        .chunks_mut(out_stride)
        .zip(white.data().chunks(white.row_stride()))
        .zip(black.data().chunks(black.row_stride()))
    {
        recover_row(row, w, white_channels, b, black_channels, config);
    }

    RasterImage::new(width, height, PixelLayout::Rgba8, out, Provenance::Composited)
}

/// Composite a straight-alpha RGBA raster over a solid background color
///
/// # Errors
/// - The raster is not RGBA
pub fn composite_over(foreground: &RasterImage, background: [u8; 3]) -> Result<RasterImage> {
    if foreground.layout() != PixelLayout::Rgba8 {
        return Err(MatteError::invalid_request(
            "compositing needs an RGBA foreground",
        ));
    }

    let mut out = Vec::with_capacity(foreground.width() as usize * foreground.height() as usize * 3);
    for px in foreground.data().chunks_exact(4) {
        let alpha = f32::from(px[3]) / 255.0;
        for (&fg, &bg) in px.iter().take(3).zip(background.iter()) {
            let value = alpha * f32::from(fg) + (1.0 - alpha) * f32::from(bg);
            out.push(value.clamp(0.0, 255.0).round() as u8);
        }
    }

    RasterImage::new(
        foreground.width(),
        foreground.height(),
        PixelLayout::Rgb8,
        out,
        Provenance::Composited,
    )
}
