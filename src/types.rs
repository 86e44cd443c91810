//! Core raster and asset types

use crate::error::{MatteError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel layout of a raster buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    /// 3 bytes per pixel, no alpha
    Rgb8,
    /// 4 bytes per pixel, straight alpha
    Rgba8,
}

impl PixelLayout {
    /// Bytes per pixel for this layout
    #[must_use]
    pub fn channels(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// Where a raster came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Produced by a generate call
    Generated,
    /// Produced by an edit call
    Edited,
    /// Resampled by the dimension reconciler
    Resampled,
    /// Produced by alpha recovery or compositing
    Composited,
    /// Loaded from outside the pipeline (files, caller-provided references)
    External,
}

/// An immutable in-memory pixel buffer
///
/// The buffer is row-major with no padding between rows. Once built a raster
/// is never mutated; every stage produces a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
    provenance: Provenance,
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("bytes", &self.data.len())
            .field("provenance", &self.provenance)
            .finish()
    }
}

impl RasterImage {
    /// Create a raster from a flat byte buffer
    ///
    /// # Errors
    /// - `data.len()` does not equal `width * height * channels`
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
        provenance: Provenance,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(layout.channels()))
            .ok_or_else(|| {
                MatteError::dimension(format!("{}x{} raster is too large", width, height))
            })?;

        if data.len() != expected {
            return Err(MatteError::dimension(format!(
                "{}x{} {:?} raster needs {} bytes, got {}",
                width,
                height,
                layout,
                expected,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            layout,
            data,
            provenance,
        })
    }

    /// Create a raster where every pixel has the same value
    ///
    /// `pixel` must hold exactly one pixel for `layout`; extra bytes are ignored
    /// and missing ones are zero.
    #[must_use]
    pub fn filled(
        width: u32,
        height: u32,
        layout: PixelLayout,
        pixel: &[u8],
        provenance: Provenance,
    ) -> Self {
        let channels = layout.channels();
        let mut one = vec![0u8; channels];
        for (dst, src) in one.iter_mut().zip(pixel) {
            *dst = *src;
        }
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * channels);
        for _ in 0..count {
            data.extend_from_slice(&one);
        }
        Self {
            width,
            height,
            layout,
            data,
            provenance,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Raw pixel bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the raster has no pixels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bytes occupied by one row
    #[must_use]
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.layout.channels()
    }

    /// Channel bytes of the pixel at `(x, y)`
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.layout.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        self.data.get(start..start + channels)
    }

    /// Re-tag the raster's provenance
    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Consume the raster and return its buffer
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Identifier of one slot inside a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u64);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// A finished asset: RGBA raster plus the prompt that produced it
#[derive(Debug, Clone)]
pub struct TransparentAsset {
    /// Straight-alpha RGBA raster (opaque primary when transparency was off)
    pub image: RasterImage,
    /// The caller's original prompt text, without pipeline directives
    pub prompt: String,
    /// Slot that produced the asset
    pub slot_id: SlotId,
    /// Position of the slot within its batch
    pub ordinal: usize,
    /// When the asset was produced
    pub created_at: DateTime<Utc>,
}

impl TransparentAsset {
    #[must_use]
    pub fn new(image: RasterImage, prompt: String, slot_id: SlotId, ordinal: usize) -> Self {
        Self {
            image,
            prompt,
            slot_id,
            ordinal,
            created_at: Utc::now(),
        }
    }

    /// Whether the asset carries an alpha channel
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.image.layout() == PixelLayout::Rgba8
    }
}
