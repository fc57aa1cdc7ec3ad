//! V4L2 frame source.
//!
//! Captures from a local device node (e.g., /dev/video0) through memory-mapped
//! buffers. The capture stream borrows its device for as long as it lives, so
//! camera controls go through a second handle on the same node.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::PixelFormat;
use super::{FrameSource, VideoMode};
use crate::frame::Frame;

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_GAIN: u32 = 0x0098_0913;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

pub struct V4l2Source {
    device_path: String,
    mode: VideoMode,
    state: Option<DeviceV4l2State>,
    controls: Option<v4l::Device>,
    format: PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(device: &str, mode: VideoMode) -> Self {
        Self {
            device_path: device.to_string(),
            mode,
            state: None,
            controls: None,
            format: PixelFormat::Yuyv,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.state = None;
        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.mode.width;
        format.height = self.mode.height;
        format.fourcc = v4l::FourCC::new(&PixelFormat::Yuyv.fourcc());

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} delivers unsupported pixel format {}",
                self.device_path,
                format.fourcc
            )
        })?;

        if self.mode.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.mode.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        self.mode.width = format.width;
        self.mode.height = format.height;
        self.last_error = None;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        match v4l::Device::with_path(&self.device_path) {
            Ok(controls) => self.controls = Some(controls),
            Err(err) => log::warn!(
                "V4l2Source: no control handle for {}: {}",
                self.device_path,
                err
            ),
        }

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.device_path,
            self.mode.width,
            self.mode.height,
            self.format
        );
        Ok(())
    }

    fn set_control(&self, id: u32, value: f64) -> Result<()> {
        use v4l::control::{Control, Value};

        let device = self
            .controls
            .as_ref()
            .ok_or_else(|| anyhow!("{} has no control handle", self.device_path))?;
        device
            .set_control(Control {
                id,
                value: Value::Integer(value.round() as i64),
            })
            .with_context(|| format!("set control {:#x} on {}", id, self.device_path))
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.mode.fps == 0 {
            2_000
        } else {
            (1000 / self.mode.fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.device_path
    }

    fn get_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::from_pixels(
            buf,
            self.mode.width,
            self.mode.height,
            self.format,
            self.frame_count,
        )
    }

    fn current_video_mode(&self) -> VideoMode {
        self.mode
    }

    fn set_video_mode(&mut self, mode: VideoMode) -> Result<()> {
        self.mode = mode;
        self.connect()
    }

    fn set_exposure(&mut self, value: f64) -> Result<()> {
        self.set_control(CID_EXPOSURE_ABSOLUTE, value)
    }

    fn set_brightness(&mut self, value: f64) -> Result<()> {
        self.set_control(CID_BRIGHTNESS, value)
    }

    fn set_gain(&mut self, value: f64) -> Result<()> {
        self.set_control(CID_GAIN, value)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }
}
