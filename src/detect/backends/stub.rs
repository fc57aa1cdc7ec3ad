use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Stub backend for testing. Reports the same detections for every frame,
/// minus boxes that start outside it.
pub struct StubBackend {
    detections: Vec<Detection>,
}

impl StubBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (w, h) = (image.width() as i32, image.height() as i32);
        Ok(self
            .detections
            .iter()
            .filter(|d| d.bbox.x < w && d.bbox.y < h)
            .cloned()
            .collect())
    }
}
