use anyhow::Result;
use image::RgbImage;

use super::result::Detection;

/// Detector backend trait.
///
/// Backends receive the oriented frame and return boxes in its pixel space.
/// A backend must not hold on to the image past the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier, used by pipeline settings to select it.
    fn name(&self) -> &'static str;

    /// Class labels indexed by class id, when known.
    fn labels(&self) -> &[String] {
        &[]
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
