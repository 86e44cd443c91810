//! Scripted mock image model for unit tests
//!
//! Renders a fixed subject over white for `generate` and over black for
//! `edit`, with per-call scripts for failures, empty replies and hangs.

use crate::{
    backends::{ImageModel, ModelPayload},
    error::{MatteError, Result},
    request::{EditRequest, GenerationRequest},
    types::{PixelLayout, Provenance, RasterImage},
};
use async_trait::async_trait;
use instant::Duration;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Opaque subject color used by [`scene`]
pub const SUBJECT: [u8; 3] = [30, 120, 200];

/// A `width` x `height` raster with an opaque [`SUBJECT`] square centred on `background`
#[must_use]
pub fn scene(background: [u8; 3], width: u32, height: u32) -> RasterImage {
    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let inside = x >= width / 4 && x < width * 3 / 4 && y >= height / 4 && y < height * 3 / 4;
            data.extend_from_slice(if inside { &SUBJECT } else { &background });
        }
    }
    RasterImage::new(width, height, PixelLayout::Rgb8, data, Provenance::Generated)
        .expect("scene buffer matches its dimensions")
}

/// What the mock does on one call
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Return the configured raster
    Succeed,
    /// Return a model error with this message
    Fail(String),
    /// Return a payload without an image
    Empty,
    /// Never complete
    Hang,
}

/// Mock image model with call recording
#[derive(Debug, Clone)]
pub struct MockImageModel {
    primary: RasterImage,
    edited: RasterImage,
    generate_script: Arc<Mutex<VecDeque<MockStep>>>,
    edit_script: Arc<Mutex<VecDeque<MockStep>>>,
    delay: Option<Duration>,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockImageModel {
    /// Mock rendering an 8x8 [`scene`] that succeeds on every call
    #[must_use]
    pub fn new() -> Self {
        Self::with_outputs(scene([255, 255, 255], 8, 8), scene([0, 0, 0], 8, 8))
    }

    #[must_use]
    pub fn with_outputs(primary: RasterImage, edited: RasterImage) -> Self {
        Self {
            primary,
            edited,
            generate_script: Arc::new(Mutex::new(VecDeque::new())),
            edit_script: Arc::new(Mutex::new(VecDeque::new())),
            delay: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Steps consumed by successive `generate` calls; afterwards calls succeed
    #[must_use]
    pub fn script_generate(self, steps: Vec<MockStep>) -> Self {
        *self.generate_script.lock().unwrap() = steps.into();
        self
    }

    /// Steps consumed by successive `edit` calls; afterwards calls succeed
    #[must_use]
    pub fn script_edit(self, steps: Vec<MockStep>) -> Self {
        *self.edit_script.lock().unwrap() = steps.into();
        self
    }

    /// Sleep this long inside every call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    /// Number of recorded calls of one operation ("generate" or "edit")
    pub fn calls(&self, operation: &str) -> usize {
        self.get_call_history()
            .iter()
            .filter(|c| c.split(':').next() == Some(operation))
            .count()
    }

    fn record_call(&self, entry: String) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(entry);
        }
    }

    async fn respond(
        &self,
        script: &Mutex<VecDeque<MockStep>>,
        output: &RasterImage,
    ) -> Result<ModelPayload> {
        let step = script
            .lock()
            .map_err(|_| MatteError::internal("mock script poisoned"))?
            .pop_front()
            .unwrap_or(MockStep::Succeed);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match step {
            MockStep::Succeed => Ok(ModelPayload::Raster(output.clone())),
            MockStep::Fail(message) => Err(MatteError::model(message)),
            MockStep::Empty => Ok(ModelPayload::Empty {
                reason: Some("mock returned no image".to_string()),
            }),
            MockStep::Hang => {
                std::future::pending::<()>().await;
                Err(MatteError::internal("pending future completed"))
            },
        }
    }
}

impl Default for MockImageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageModel for MockImageModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<ModelPayload> {
        self.record_call(format!("generate:{}", request.prompt));
        self.respond(&self.generate_script, &self.primary).await
    }

    async fn edit(&self, request: &EditRequest) -> Result<ModelPayload> {
        self.record_call(format!("edit:{}", request.instruction));
        self.respond(&self.edit_script, &self.edited).await
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_follows_script_then_succeeds() {
        let model = MockImageModel::new().script_generate(vec![
            MockStep::Fail("boom".to_string()),
            MockStep::Empty,
        ]);
        let request = GenerationRequest::new("cat", "mock-model");

        assert!(matches!(model.generate(&request).await, Err(MatteError::Model(_))));
        assert!(matches!(
            model.generate(&request).await,
            Ok(ModelPayload::Empty { .. })
        ));
        assert!(matches!(
            model.generate(&request).await,
            Ok(ModelPayload::Raster(_))
        ));
        assert_eq!(model.calls("generate"), 3);
        assert_eq!(model.calls("edit"), 0);
    }

    #[test]
    fn test_scene_layout() {
        let white = scene([255, 255, 255], 8, 8);
        assert_eq!(white.pixel(0, 0), Some(&[255u8, 255, 255][..]));
        assert_eq!(white.pixel(4, 4), Some(&SUBJECT[..]));
    }
}
