//! Synthetic frame source for `stub://` devices.
//!
//! Renders lit rectangles on a dark background with random single-pixel
//! speckles in the target color, so a reflective pipeline has something to
//! find and something to reject. Frames are paced to the configured FPS.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, VideoMode};
use crate::frame::Frame;

/// A lit rectangle, in fractions of the frame size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticTarget {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub color: [u8; 3],
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub mode: VideoMode,
    pub targets: Vec<SyntheticTarget>,
    /// Speckle pixels per frame.
    pub speckles: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            mode: VideoMode::default(),
            targets: vec![SyntheticTarget {
                x: 0.55,
                y: 0.30,
                width: 0.08,
                height: 0.12,
                color: [0, 255, 0],
            }],
            speckles: 25,
            seed: 0x5eed,
        }
    }
}

pub struct SyntheticSource {
    name: String,
    config: SyntheticConfig,
    rng: StdRng,
    sequence: u64,
    next_due: Option<Instant>,
    exposure: f64,
    brightness: f64,
}

impl SyntheticSource {
    pub fn new(name: &str, config: SyntheticConfig) -> Result<Self> {
        if config.mode.width == 0 || config.mode.height == 0 {
            bail!("synthetic source {} needs a non-zero resolution", name);
        }
        log::info!(
            "SyntheticSource: {} rendering {}x{} @ {} fps",
            name,
            config.mode.width,
            config.mode.height,
            config.mode.fps
        );
        Ok(Self {
            name: name.to_string(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            sequence: 0,
            next_due: None,
            exposure: 100.0,
            brightness: 20.0,
        })
    }

    pub fn set_targets(&mut self, targets: Vec<SyntheticTarget>) {
        self.config.targets = targets;
    }

    fn pace(&mut self) {
        let fps = self.config.mode.fps;
        if fps == 0 {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / f64::from(fps));
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.next_due = Some(self.next_due.unwrap_or(now).max(now) + period);
    }

    fn render(&mut self) -> RgbImage {
        let VideoMode { width, height, .. } = self.config.mode;
        let level = self.brightness.clamp(0.0, 255.0) as u8;
        let mut image = RgbImage::from_pixel(width, height, Rgb([level, level, level]));

        let gain = (self.exposure / 100.0).clamp(0.0, 1.0);
        let scaled = |c: [u8; 3]| Rgb(c.map(|v| (f64::from(v) * gain).round() as u8));

        for t in &self.config.targets {
            let x0 = (t.x * f64::from(width)).round().max(0.0) as u32;
            let y0 = (t.y * f64::from(height)).round().max(0.0) as u32;
            let x1 = (((t.x + t.width) * f64::from(width)).round().max(0.0) as u32).min(width);
            let y1 = (((t.y + t.height) * f64::from(height)).round().max(0.0) as u32).min(height);
            let color = scaled(t.color);
            for y in y0..y1 {
                for x in x0..x1 {
                    image.put_pixel(x, y, color);
                }
            }
        }

        if let Some(color) = self.config.targets.first().map(|t| scaled(t.color)) {
            for _ in 0..self.config.speckles {
                let x = self.rng.gen_range(0..width);
                let y = self.rng.gen_range(0..height);
                image.put_pixel(x, y, color);
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_frame(&mut self) -> Result<Frame> {
        self.pace();
        let image = self.render();
        self.sequence += 1;
        Ok(Frame::new(image, self.sequence))
    }

    fn current_video_mode(&self) -> VideoMode {
        self.config.mode
    }

    fn set_video_mode(&mut self, mode: VideoMode) -> Result<()> {
        if mode.width == 0 || mode.height == 0 {
            bail!("video mode {}x{} is not supported", mode.width, mode.height);
        }
        log::info!(
            "SyntheticSource: {} switching to {}x{} @ {} fps",
            self.name,
            mode.width,
            mode.height,
            mode.fps
        );
        self.config.mode = mode;
        self.next_due = None;
        Ok(())
    }

    /// Percent of full target intensity.
    fn set_exposure(&mut self, value: f64) -> Result<()> {
        self.exposure = value;
        Ok(())
    }

    fn set_brightness(&mut self, value: f64) -> Result<()> {
        self.brightness = value;
        Ok(())
    }

    fn set_gain(&mut self, _value: f64) -> Result<()> {
        bail!("{} has no gain control", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyntheticConfig {
        SyntheticConfig {
            mode: VideoMode {
                width: 100,
                height: 50,
                fps: 0,
            },
            targets: vec![SyntheticTarget {
                x: 0.1,
                y: 0.2,
                width: 0.2,
                height: 0.4,
                color: [0, 255, 0],
            }],
            speckles: 0,
            seed: 1,
        }
    }

    #[test]
    fn renders_targets_at_their_fractions() -> Result<()> {
        let mut source = SyntheticSource::new("stub://test", config())?;
        let frame = source.get_frame()?;
        assert_eq!(frame.dimensions(), (100, 50));
        assert_eq!(frame.image.get_pixel(10, 10).0, [0, 255, 0]);
        assert_eq!(frame.image.get_pixel(29, 29).0, [0, 255, 0]);
        assert_eq!(frame.image.get_pixel(30, 30).0, [20, 20, 20]);
        Ok(())
    }

    #[test]
    fn sequence_numbers_increase() -> Result<()> {
        let mut source = SyntheticSource::new("stub://test", config())?;
        let a = source.get_frame()?.sequence;
        let b = source.get_frame()?.sequence;
        assert!(b > a);
        Ok(())
    }

    #[test]
    fn exposure_dims_targets_and_gain_is_unsupported() -> Result<()> {
        let mut source = SyntheticSource::new("stub://test", config())?;
        source.set_exposure(50.0)?;
        let frame = source.get_frame()?;
        assert_eq!(frame.image.get_pixel(10, 10).0, [0, 128, 0]);
        assert!(source.set_gain(1.0).is_err());
        Ok(())
    }

    #[test]
    fn video_mode_changes_resolution() -> Result<()> {
        let mut source = SyntheticSource::new("stub://test", config())?;
        source.set_video_mode(VideoMode {
            width: 64,
            height: 48,
            fps: 0,
        })?;
        assert_eq!(source.get_frame()?.dimensions(), (64, 48));
        assert!(source
            .set_video_mode(VideoMode {
                width: 0,
                height: 48,
                fps: 0
            })
            .is_err());
        Ok(())
    }
}
