//! Shared fixtures for integration tests
//!
//! `ScriptedModel` renders a known straight-alpha foreground composited over
//! white for `generate` and over black for `edit`, so recovered assets can be
//! compared against ground truth.

#![allow(dead_code)]

use async_trait::async_trait;
use dualmatte::{
    EditRequest, GenerationRequest, ImageModel, MatteError, ModelPayload, PixelLayout, Provenance,
    RasterImage, RasterCodec, Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Composite one straight-alpha pixel over a solid background
pub fn over(foreground: [u8; 4], background: [u8; 3]) -> [u8; 3] {
    let alpha = f32::from(foreground[3]) / 255.0;
    let mut out = [0u8; 3];
    for (channel, value) in out.iter_mut().enumerate() {
        let blended = f32::from(foreground[channel]) * alpha
            + f32::from(background[channel]) * (1.0 - alpha);
        *value = blended.round() as u8;
    }
    out
}

/// Render a foreground over `background`, one RGB raster
pub fn render(foreground: &[[u8; 4]], width: u32, height: u32, background: [u8; 3]) -> RasterImage {
    let data = foreground
        .iter()
        .flat_map(|pixel| over(*pixel, background))
        .collect();
    RasterImage::new(width, height, PixelLayout::Rgb8, data, Provenance::Generated)
        .expect("foreground matches dimensions")
}

/// A 4x4 foreground: opaque red centre, half-transparent green ring, clear corners
pub fn sample_foreground() -> Vec<[u8; 4]> {
    let mut pixels = Vec::with_capacity(16);
    for y in 0..4u32 {
        for x in 0..4u32 {
            let corner = (x == 0 || x == 3) && (y == 0 || y == 3);
            let centre = (1..3).contains(&x) && (1..3).contains(&y);
            pixels.push(if centre {
                [220, 40, 40, 255]
            } else if corner {
                [0, 0, 0, 0]
            } else {
                [40, 200, 80, 128]
            });
        }
    }
    pixels
}

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Image,
    /// Encoded PNG instead of a decoded raster
    Png,
    Fail(&'static str),
    NoImage,
    Hang,
}

pub struct ScriptedModel {
    white: RasterImage,
    black: RasterImage,
    generate_replies: Mutex<VecDeque<Reply>>,
    edit_replies: Mutex<VecDeque<Reply>>,
    edit_delay: Option<Duration>,
    generate_calls: AtomicUsize,
    edit_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        let foreground = sample_foreground();
        Self::with_renders(
            render(&foreground, 4, 4, [255, 255, 255]),
            render(&foreground, 4, 4, [0, 0, 0]),
        )
    }

    pub fn with_renders(white: RasterImage, black: RasterImage) -> Self {
        Self {
            white,
            black,
            generate_replies: Mutex::new(VecDeque::new()),
            edit_replies: Mutex::new(VecDeque::new()),
            edit_delay: None,
            generate_calls: AtomicUsize::new(0),
            edit_calls: AtomicUsize::new(0),
        }
    }

    pub fn generate_replies(self, replies: Vec<Reply>) -> Self {
        *self.generate_replies.lock().unwrap() = replies.into();
        self
    }

    pub fn edit_replies(self, replies: Vec<Reply>) -> Self {
        *self.edit_replies.lock().unwrap() = replies.into();
        self
    }

    /// Every edit call sleeps this long before replying
    pub fn edit_delay(mut self, delay: Duration) -> Self {
        self.edit_delay = Some(delay);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn edit_calls(&self) -> usize {
        self.edit_calls.load(Ordering::SeqCst)
    }

    async fn reply(queue: &Mutex<VecDeque<Reply>>, image: &RasterImage) -> Result<ModelPayload> {
        let reply = queue.lock().unwrap().pop_front().unwrap_or(Reply::Image);
        match reply {
            Reply::Image => Ok(ModelPayload::Raster(image.clone())),
            Reply::Png => Ok(ModelPayload::Encoded {
                bytes: RasterCodec::encode_png(image)?,
                mime_type: Some("image/png".to_string()),
            }),
            Reply::Fail(message) => Err(MatteError::model(message)),
            Reply::NoImage => Ok(ModelPayload::Empty {
                reason: Some("SAFETY".to_string()),
            }),
            Reply::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            },
        }
    }
}

#[async_trait]
impl ImageModel for ScriptedModel {
    async fn generate(&self, _request: &GenerationRequest) -> Result<ModelPayload> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Self::reply(&self.generate_replies, &self.white).await
    }

    async fn edit(&self, _request: &EditRequest) -> Result<ModelPayload> {
        self.edit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.edit_delay {
            tokio::time::sleep(delay).await;
        }
        Self::reply(&self.edit_replies, &self.black).await
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn template(prompt: &str) -> GenerationRequest {
    GenerationRequest::new(prompt, "scripted-model")
}
