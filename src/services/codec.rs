//! Raster codec adapter
//!
//! The core only sees `{width, height, bytes}` rasters. Container formats
//! (PNG, JPEG, ...) are decoded and encoded here, at the edge, with the
//! `image` crate.

use crate::{
    backends::ModelPayload,
    error::{MatteError, Result},
    types::{PixelLayout, Provenance, RasterImage},
};
use image::{DynamicImage, ImageBuffer, ImageFormat};
use std::path::Path;
use tracing::debug;

/// Service for converting between encoded images and rasters
pub struct RasterCodec;

impl RasterCodec {
    /// Decode an encoded image (PNG, JPEG, ...) into a raster
    ///
    /// Images with an alpha channel decode to RGBA, everything else to RGB.
    ///
    /// # Errors
    /// - The bytes are not a decodable image
    pub fn decode(bytes: &[u8], provenance: Provenance) -> Result<RasterImage> {
        let image = image::load_from_memory(bytes)?;
        Self::from_dynamic(&image, provenance)
    }

    /// Convert a decoded `DynamicImage` into a raster
    ///
    /// # Errors
    /// - The converted buffer does not match the image dimensions
    pub fn from_dynamic(image: &DynamicImage, provenance: Provenance) -> Result<RasterImage> {
        let (width, height) = (image.width(), image.height());
        let (layout, data) = if image.color().has_alpha() {
            (PixelLayout::Rgba8, image.to_rgba8().into_raw())
        } else {
            (PixelLayout::Rgb8, image.to_rgb8().into_raw())
        };
        RasterImage::new(width, height, layout, data, provenance)
    }

    /// Convert a raster into a `DynamicImage`
    ///
    /// # Errors
    /// - The raster buffer does not match its dimensions
    pub fn to_dynamic(raster: &RasterImage) -> Result<DynamicImage> {
        let data = raster.data().to_vec();
        let image = match raster.layout() {
            PixelLayout::Rgb8 => ImageBuffer::from_raw(raster.width(), raster.height(), data)
                .map(DynamicImage::ImageRgb8),
            PixelLayout::Rgba8 => ImageBuffer::from_raw(raster.width(), raster.height(), data)
                .map(DynamicImage::ImageRgba8),
        };
        image.ok_or_else(|| MatteError::internal("raster buffer does not match its dimensions"))
    }

    /// Encode a raster as PNG, keeping any alpha channel
    ///
    /// # Errors
    /// - Encoding failures
    pub fn encode_png(raster: &RasterImage) -> Result<Vec<u8>> {
        let image = Self::to_dynamic(raster)?;
        let mut buffer = Vec::new();
        image.write_to(&mut std::io::Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Load a raster from an image file
    ///
    /// # Errors
    /// - The file can't be read or decoded
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RasterImage> {
        let path_ref = path.as_ref();
        let bytes = std::fs::read(path_ref).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("Failed to read image '{}': {}", path_ref.display(), e),
            )
        })?;
        debug!(path = %path_ref.display(), bytes = bytes.len(), "Decoding image file");
        Self::decode(&bytes, Provenance::External)
    }

    /// Save a raster as a PNG file, creating parent directories
    ///
    /// # Errors
    /// - Directory creation, encoding or write failures
    pub fn save_png<P: AsRef<Path>>(raster: &RasterImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = Self::encode_png(raster)?;
        std::fs::write(path_ref, bytes)?;
        debug!(path = %path_ref.display(), "Saved PNG");
        Ok(())
    }
}

/// Resolve a collaborator payload into a usable raster
///
/// Empty payloads, zero-sized rasters and undecodable bytes are all reported as
/// [`MatteError::MalformedResponse`]: the call claimed success but produced no image.
///
/// # Errors
/// - The payload holds no decodable, non-empty image
pub fn decode_payload(payload: ModelPayload, provenance: Provenance) -> Result<RasterImage> {
    let raster = match payload {
        ModelPayload::Raster(raster) => raster.with_provenance(provenance),
        ModelPayload::Encoded { bytes, mime_type } => {
            if bytes.is_empty() {
                return Err(MatteError::malformed("response image data is empty"));
            }
            RasterCodec::decode(&bytes, provenance).map_err(|e| {
                MatteError::malformed(format!(
                    "response image ({}) could not be decoded: {}",
                    mime_type.as_deref().unwrap_or("unknown type"),
                    e
                ))
            })?
        },
        ModelPayload::Empty { reason } => {
            return Err(MatteError::malformed(format!(
                "response contained no image{}",
                reason.map(|r| format!(": {}", r)).unwrap_or_default()
            )));
        },
    };

    if raster.is_empty() {
        return Err(MatteError::malformed(format!(
            "response image is {}x{}",
            raster.width(),
            raster.height()
        )));
    }
    Ok(raster)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RasterImage {
        RasterImage::new(
            2,
            2,
            PixelLayout::Rgba8,
            vec![
                255, 0, 0, 255, 0, 255, 0, 128, //
                0, 0, 255, 0, 10, 20, 30, 40,
            ],
            Provenance::Composited,
        )
        .unwrap()
    }

    #[test]
    fn test_png_encoding_preserves_pixels_and_alpha() {
        let raster = sample();
        let png = RasterCodec::encode_png(&raster).unwrap();
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);

        let decoded = RasterCodec::decode(&png, Provenance::External).unwrap();
        assert_eq!(decoded.layout(), PixelLayout::Rgba8);
        assert_eq!(decoded.data(), raster.data());
    }

    #[test]
    fn test_opaque_images_decode_to_rgb() {
        let raster = RasterImage::filled(3, 3, PixelLayout::Rgb8, &[1, 2, 3], Provenance::Generated);
        let png = RasterCodec::encode_png(&raster).unwrap();
        let decoded = RasterCodec::decode(&png, Provenance::Generated).unwrap();
        assert_eq!(decoded.layout(), PixelLayout::Rgb8);
        assert_eq!(decoded, raster);
    }

    #[test]
    fn test_payload_variants_resolve() {
        let raster = sample();
        let resolved =
            decode_payload(ModelPayload::Raster(raster.clone()), Provenance::Edited).unwrap();
        assert_eq!(resolved.provenance(), Provenance::Edited);
        assert_eq!(resolved.data(), raster.data());

        let encoded = ModelPayload::Encoded {
            bytes: RasterCodec::encode_png(&raster).unwrap(),
            mime_type: Some("image/png".to_string()),
        };
        assert!(decode_payload(encoded, Provenance::Generated).is_ok());
    }

    #[test]
    fn test_unusable_payloads_are_malformed() {
        let empty = ModelPayload::Empty {
            reason: Some("finishReason SAFETY".to_string()),
        };
        let err = decode_payload(empty, Provenance::Generated).unwrap_err();
        assert!(matches!(err, MatteError::MalformedResponse(_)));
        assert!(err.to_string().contains("SAFETY"));

        let garbage = ModelPayload::Encoded {
            bytes: vec![1, 2, 3, 4],
            mime_type: None,
        };
        assert!(matches!(
            decode_payload(garbage, Provenance::Generated),
            Err(MatteError::MalformedResponse(_))
        ));

        let zero = RasterImage::new(0, 0, PixelLayout::Rgb8, vec![], Provenance::Generated).unwrap();
        assert!(matches!(
            decode_payload(ModelPayload::Raster(zero), Provenance::Generated),
            Err(MatteError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_save_and_load_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("asset.png");
        RasterCodec::save_png(&sample(), &path).unwrap();

        let loaded = RasterCodec::load(&path).unwrap();
        assert_eq!(loaded.provenance(), Provenance::External);
        assert_eq!(loaded.data(), sample().data());
    }
}
