//! Frame ingestion sources.
//!
//! This module provides the sources a vision process pulls frames from:
//! - Synthetic scenes (`stub://` device paths, tests and bench runs)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source delivers RGB `Frame`s regardless of the native capture
//! format. Exposure, brightness and gain are best effort: a source that cannot
//! honour a control returns an error and the caller logs it.

pub mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub use normalize::PixelFormat;
pub use synthetic::{SyntheticConfig, SyntheticSource, SyntheticTarget};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for VideoMode {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

pub trait FrameSource: Send {
    /// Device path or other human-readable identifier.
    fn name(&self) -> &str;

    /// Block until the next frame is available.
    fn get_frame(&mut self) -> Result<Frame>;

    fn current_video_mode(&self) -> VideoMode;

    fn set_video_mode(&mut self, mode: VideoMode) -> Result<()>;

    fn set_exposure(&mut self, value: f64) -> Result<()>;

    fn set_brightness(&mut self, value: f64) -> Result<()>;

    fn set_gain(&mut self, value: f64) -> Result<()>;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Open the source behind `device`. `stub://` paths give a synthetic scene.
pub fn open_source(device: &str, mode: VideoMode) -> Result<Box<dyn FrameSource>> {
    if device.starts_with("stub://") {
        let config = SyntheticConfig {
            mode,
            ..SyntheticConfig::default()
        };
        return Ok(Box::new(SyntheticSource::new(device, config)?));
    }
    open_device(device, mode)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(device: &str, mode: VideoMode) -> Result<Box<dyn FrameSource>> {
    let mut source = V4l2Source::new(device, mode);
    source.connect()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(device: &str, _mode: VideoMode) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "cannot open {}: built without V4L2 support (enable feature ingest-v4l2)",
        device
    ))
}
