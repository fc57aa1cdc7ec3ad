//! Result sinks and the payloads they publish.
//!
//! A sink receives `FrameReport`s from its own thread at its own rate; a slow
//! sink only ever sees fewer frames. Sinks project a report into either a
//! `TelemetrySnapshot` (control system) or a `UiSnapshot` (operator display).

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;

use crate::camera::CameraId;
use crate::manager::PipelineSelector;
use crate::pipeline::{PipelineResult, ResultKind};
use crate::target::{TargetPose, TrackedTarget};

/// One processed frame as handed to sinks.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub camera: CameraId,
    pub result: Arc<PipelineResult>,
    pub fps: f64,
    pub selector: PipelineSelector,
}

impl FrameReport {
    pub fn pipeline_index(&self) -> Option<usize> {
        match self.selector {
            PipelineSelector::Detection(index) => Some(index),
            PipelineSelector::DriverMode => None,
        }
    }

    pub fn driver_mode(&self) -> bool {
        self.selector == PipelineSelector::DriverMode
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        let result = &self.result;
        TelemetrySnapshot {
            camera: self.camera.to_string(),
            sequence: result.sequence,
            kind: result.kind,
            has_targets: result.has_targets(),
            targets: result.targets.iter().map(TargetTelemetry::from).collect(),
            latency_ms: result.latency().as_secs_f64() * 1000.0,
            processing_ms: result.processing_time.as_secs_f64() * 1000.0,
            fps: self.fps,
            pipeline_index: self.pipeline_index(),
            driver_mode: self.driver_mode(),
            timestamp_ms: unix_millis(),
        }
    }

    pub fn ui(&self) -> UiSnapshot {
        let result = &self.result;
        UiSnapshot {
            camera: self.camera.to_string(),
            fps: self.fps,
            latency_ms: result.latency().as_secs_f64() * 1000.0,
            target_count: result.targets.len(),
            best: result.best_target().map(TargetTelemetry::from),
            pipeline_index: self.pipeline_index(),
            driver_mode: self.driver_mode(),
            width: result.output_image.width(),
            height: result.output_image.height(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetTelemetry {
    pub pitch: f64,
    pub yaw: f64,
    pub area: f64,
    pub skew: f64,
    pub corners: [[f64; 2]; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<TargetPose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl From<&TrackedTarget> for TargetTelemetry {
    fn from(target: &TrackedTarget) -> Self {
        Self {
            pitch: target.pitch,
            yaw: target.yaw,
            area: target.area,
            skew: target.skew,
            corners: target.corners.map(|c| [c.x, c.y]),
            pose: target.pose,
            label: target.detection.as_ref().and_then(|d| d.label.clone()),
            confidence: target.detection.as_ref().map(|d| d.confidence),
        }
    }
}

/// Everything the control system needs for one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub camera: String,
    pub sequence: u64,
    pub kind: ResultKind,
    pub has_targets: bool,
    pub targets: Vec<TargetTelemetry>,
    pub latency_ms: f64,
    pub processing_ms: f64,
    pub fps: f64,
    pub pipeline_index: Option<usize>,
    pub driver_mode: bool,
    pub timestamp_ms: u64,
}

/// Reduced view for the operator display.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UiSnapshot {
    pub camera: String,
    pub fps: f64,
    pub latency_ms: f64,
    pub target_count: usize,
    pub best: Option<TargetTelemetry>,
    pub pipeline_index: Option<usize>,
    pub driver_mode: bool,
    pub width: u32,
    pub height: u32,
}

pub trait ResultSink: Send {
    fn name(&self) -> &str;

    /// Upper bound on publish rate; `None` means every frame.
    fn max_rate_hz(&self) -> Option<f64> {
        None
    }

    fn publish(&mut self, report: &FrameReport) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs UI snapshots at debug level.
pub struct LogSink {
    rate_hz: f64,
}

impl LogSink {
    pub fn new(rate_hz: f64) -> Self {
        Self { rate_hz }
    }
}

impl ResultSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn max_rate_hz(&self) -> Option<f64> {
        Some(self.rate_hz)
    }

    fn publish(&mut self, report: &FrameReport) -> Result<()> {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("ui {}", serde_json::to_string(&report.ui())?);
        }
        Ok(())
    }
}

/// Writes the annotated output image as `<dir>/<camera>.jpg`, replacing the
/// previous snapshot atomically.
pub struct JpegSnapshotSink {
    dir: PathBuf,
    quality: u8,
    rate_hz: f64,
}

impl JpegSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, quality: u8, rate_hz: f64) -> Result<Self> {
        let dir = dir.into();
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100, got {}", quality));
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
        Ok(Self {
            dir,
            quality,
            rate_hz,
        })
    }

    pub fn snapshot_path(&self, camera: &CameraId) -> PathBuf {
        self.dir.join(format!("{}.jpg", camera))
    }
}

impl ResultSink for JpegSnapshotSink {
    fn name(&self) -> &str {
        "jpeg"
    }

    fn max_rate_hz(&self) -> Option<f64> {
        Some(self.rate_hz)
    }

    fn publish(&mut self, report: &FrameReport) -> Result<()> {
        let path = self.snapshot_path(&report.camera);
        let tmp = path.with_extension("jpg.tmp");
        write_jpeg(&tmp, &report.result, self.quality)?;
        fs::rename(&tmp, &path).with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }
}

fn write_jpeg(path: &Path, result: &PipelineResult, quality: u8) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality)
        .encode_image(result.output_image.as_ref())
        .with_context(|| format!("encode {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Forwards telemetry into a bounded channel, dropping snapshots when the
/// receiver falls behind.
pub struct ChannelSink {
    tx: Sender<TelemetrySnapshot>,
}

impl ChannelSink {
    pub fn new(tx: Sender<TelemetrySnapshot>) -> Self {
        Self { tx }
    }
}

impl ResultSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn publish(&mut self, report: &FrameReport) -> Result<()> {
        match self.tx.try_send(report.telemetry()) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("telemetry receiver dropped")),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point2, Rect, RotatedRect};
    use crate::target::DetectedClass;
    use image::RgbImage;
    use std::time::{Duration, Instant};

    fn target(yaw: f64) -> TrackedTarget {
        TrackedTarget {
            offset: Point2::new(320.0, 240.0),
            center: Point2::new(400.0, 240.0),
            pitch: 0.0,
            yaw,
            area: 1.5,
            skew: 0.0,
            min_area_rect: RotatedRect::default(),
            bounding_rect: Rect::new(380, 220, 40, 40),
            corners: [Point2::new(380.0, 220.0); 4],
            pose: None,
            detection: Some(DetectedClass {
                class_id: 0,
                label: Some("cone".into()),
                confidence: 0.9,
            }),
        }
    }

    fn report(targets: Vec<TrackedTarget>, selector: PipelineSelector) -> FrameReport {
        FrameReport {
            camera: CameraId::new("front"),
            result: Arc::new(PipelineResult {
                targets,
                output_image: Arc::new(RgbImage::new(32, 24)),
                processing_time: Duration::from_millis(4),
                stage_timings: Vec::new(),
                captured_at: Instant::now(),
                sequence: 7,
                kind: ResultKind::Detection2d,
            }),
            fps: 29.5,
            selector,
        }
    }

    #[test]
    fn telemetry_carries_targets_and_selection() {
        let snapshot = report(vec![target(5.0), target(-2.0)], PipelineSelector::Detection(1))
            .telemetry();
        assert!(snapshot.has_targets);
        assert_eq!(snapshot.targets.len(), 2);
        assert_eq!(snapshot.targets[0].yaw, 5.0);
        assert_eq!(snapshot.targets[0].label.as_deref(), Some("cone"));
        assert_eq!(snapshot.pipeline_index, Some(1));
        assert!(!snapshot.driver_mode);
        assert_eq!(snapshot.sequence, 7);
        assert!((snapshot.processing_ms - 4.0).abs() < 1e-9);
    }

    #[test]
    fn ui_snapshot_keeps_only_the_best_target() -> Result<()> {
        let ui = report(vec![target(5.0), target(-2.0)], PipelineSelector::DriverMode).ui();
        assert_eq!(ui.target_count, 2);
        assert_eq!(ui.best.as_ref().map(|t| t.yaw), Some(5.0));
        assert!(ui.driver_mode);
        assert_eq!(ui.pipeline_index, None);
        assert_eq!((ui.width, ui.height), (32, 24));

        let json = serde_json::to_value(&ui)?;
        assert_eq!(json["best"]["confidence"], serde_json::json!(0.9f32));
        Ok(())
    }

    #[test]
    fn jpeg_sink_replaces_snapshot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = JpegSnapshotSink::new(dir.path(), 80, 30.0)?;
        let report = report(Vec::new(), PipelineSelector::Detection(0));
        sink.publish(&report)?;
        sink.publish(&report)?;

        let path = sink.snapshot_path(&report.camera);
        let decoded = image::open(&path)?;
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
        assert!(!path.with_extension("jpg.tmp").exists());
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_snapshot_writes_are_reported() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let report = report(Vec::new(), PipelineSelector::Detection(0));
        let err = write_jpeg(full, &report.result, 80).unwrap_err();
        assert!(format!("{:#}", err).contains("/dev/full"));
    }

    #[test]
    fn jpeg_quality_is_validated() {
        assert!(JpegSnapshotSink::new(std::env::temp_dir(), 0, 30.0).is_err());
    }

    #[test]
    fn channel_sink_drops_when_full() -> Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut sink = ChannelSink::new(tx);
        let report = report(Vec::new(), PipelineSelector::Detection(0));
        sink.publish(&report)?;
        sink.publish(&report)?;
        assert_eq!(rx.len(), 1);
        drop(rx);
        assert!(sink.publish(&report).is_err());
        Ok(())
    }
}
