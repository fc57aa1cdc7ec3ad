use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::pipe::{FindContoursPipe, HsvThresholdParams, HsvThresholdPipe, Pipe};

/// One color class: an HSV box with a label.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorClass {
    pub label: String,
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

/// Reference backend that reports colored blobs as objects.
///
/// Confidence is how much of the bounding box the blob fills, so solid
/// shapes score high and stray outlines score low.
pub struct ColorBlobBackend {
    classes: Vec<ColorClass>,
    labels: Vec<String>,
    min_pixels: f64,
}

impl ColorBlobBackend {
    pub fn new(classes: Vec<ColorClass>) -> Self {
        let labels = classes.iter().map(|c| c.label.clone()).collect();
        Self {
            classes,
            labels,
            min_pixels: 16.0,
        }
    }
}

impl DetectorBackend for ColorBlobBackend {
    fn name(&self) -> &'static str {
        "color_blob"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();
        for (class_id, class) in self.classes.iter().enumerate() {
            let mut threshold = HsvThresholdPipe::new(HsvThresholdParams {
                lower: class.lower,
                upper: class.upper,
                hue_inverted: false,
            });
            let mask = threshold.process(image)?;
            for contour in FindContoursPipe.process(&mask)? {
                let bbox = contour.bounding_rect();
                if bbox.area() < self.min_pixels {
                    continue;
                }
                let lit = (bbox.y..bbox.y + bbox.height)
                    .flat_map(|y| (bbox.x..bbox.x + bbox.width).map(move |x| (x, y)))
                    .filter(|&(x, y)| mask.get_pixel(x as u32, y as u32).0[0] > 0)
                    .count();
                detections.push(Detection {
                    bbox,
                    confidence: (lit as f64 / bbox.area()) as f32,
                    class_id: class_id as u32,
                    label: Some(class.label.clone()),
                });
            }
        }
        Ok(detections)
    }
}
