//! aimpoint: vision coprocessor pipeline engine.
//!
//! Ingests camera frames, finds reflective or colored targets (or targets
//! reported by a detector backend), turns them into robot-relative aiming
//! angles and fans the results out to the control system and an operator UI.
//!
//! # Module Structure
//!
//! - `geometry`, `contour`: points, rectangles, hulls, moments and contours
//! - `camera`: pinhole geometry, intrinsics, camera registry
//! - `pipe`: the per-stage transforms (threshold through draw)
//! - `pipeline`: reflective, object-detection and driver-mode pipelines
//! - `manager`: per-camera named pipelines and the active selection
//! - `runtime`: the detection thread, latest-result slot and throttled sinks
//! - `ingest`, `store`, `publish`, `detect`, `transport`: external interfaces
//! - `config`: daemon configuration

pub mod camera;
pub mod config;
pub mod contour;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod manager;
pub mod pipe;
pub mod pipeline;
pub mod publish;
pub mod runtime;
pub mod settings;
pub mod store;
pub mod target;
pub mod transport;

pub use camera::{CameraGeometry, CameraId, CameraInfo, CameraIntrinsics, CameraRegistry};
pub use config::{AimpointConfig, CameraConfig};
pub use contour::Contour;
pub use detect::{BackendRegistry, ColorBlobBackend, ColorClass, Detection, DetectorBackend};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SyntheticConfig, SyntheticSource, VideoMode};
pub use manager::{PipelineManager, PipelineSelector};
pub use pipeline::{
    build_pipeline, DriverModePipeline, PipelineContext, PipelineResult, ResultKind,
    VisionPipeline,
};
pub use publish::{FrameReport, ResultSink, TelemetrySnapshot, UiSnapshot};
pub use runtime::{Command, FpsAverager, LatestSlot, VisionHandle, VisionProcess};
pub use settings::{DriverModeSettings, PipelineSettings, PipelineType};
pub use store::{InMemorySettingsStore, JsonDirSettingsStore, SettingsStore, StoredPipelines};
pub use target::{TargetPose, TrackedTarget};
