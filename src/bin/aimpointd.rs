//! aimpointd - vision coprocessor daemon
//!
//! This daemon:
//! 1. Opens every configured camera (synthetic `stub://` or V4L2)
//! 2. Loads each camera's pipelines from the JSON settings directory
//! 3. Runs one detection thread per camera
//! 4. Fans results out to the log, JPEG snapshot and MQTT telemetry sinks
//! 5. Logs per-camera health every few seconds until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aimpoint::config::{AimpointConfig, CameraConfig};
use aimpoint::publish::{JpegSnapshotSink, LogSink};
use aimpoint::store::CameraMetadata;
use aimpoint::transport::MqttTelemetrySink;
use aimpoint::{
    open_source, BackendRegistry, CameraGeometry, CameraRegistry, ColorBlobBackend,
    DetectorBackend, JsonDirSettingsStore, PipelineContext, PipelineManager, ResultSink,
    SettingsStore, VisionHandle, VisionProcess,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the aimpoint vision pipelines")]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "AIMPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the pipeline settings directory.
    #[arg(long)]
    settings_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = AimpointConfig::load_from(args.config.as_deref())?;
    if let Some(dir) = args.settings_dir {
        cfg.settings_dir = dir;
    }
    let store: Arc<dyn SettingsStore> = Arc::new(JsonDirSettingsStore::open(&cfg.settings_dir)?);
    log::info!("settings directory: {}", cfg.settings_dir.display());

    let mut detectors = BackendRegistry::new();
    if !cfg.color_classes.is_empty() {
        let mut backend = ColorBlobBackend::new(cfg.color_classes.clone());
        backend.warm_up()?;
        detectors.register(backend);
        log::info!("detector color_blob: {} classes", cfg.color_classes.len());
    }

    let mut cameras = CameraRegistry::new();
    let mut handles = Vec::with_capacity(cfg.cameras.len());
    for camera in &cfg.cameras {
        let handle = start_camera(&cfg, camera, &store, &detectors, &mut cameras)
            .with_context(|| format!("start camera {}", camera.name))?;
        handles.push(handle);
    }

    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("error setting Ctrl-C handler")?;
    log::info!("aimpointd running with {} camera(s)", handles.len());

    let mut last_health_log = Instant::now();
    loop {
        if rx.recv_timeout(Duration::from_millis(250)).is_ok() {
            log::info!("shutdown signal received");
            break;
        }
        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log_health(&handles);
            last_health_log = Instant::now();
        }
        if handles.iter().all(|h| !h.is_running()) {
            log::error!("every camera has stopped");
            break;
        }
    }

    for handle in handles {
        if let Err(e) = handle.stop() {
            log::warn!("{:#}", e);
        }
    }
    Ok(())
}

fn start_camera(
    cfg: &AimpointConfig,
    camera: &CameraConfig,
    store: &Arc<dyn SettingsStore>,
    detectors: &BackendRegistry,
    cameras: &mut CameraRegistry,
) -> Result<VisionHandle> {
    let stored = match store.load_camera(&camera.id()) {
        Ok(stored) => stored,
        Err(e) => {
            log::warn!("camera {}: stored metadata unreadable: {:#}", camera.id(), e);
            None
        }
    };
    let info = cameras.register(
        &camera.name,
        camera.diagonal_fov,
        stored.as_ref().and_then(|meta| meta.intrinsics),
    )?;
    let id = info.id.clone();
    let source = open_source(&camera.device, camera.video_mode)?;
    let mode = source.current_video_mode();
    log::info!(
        "Source: {} ({}x{} @ {} fps) for camera {}",
        source.name(),
        mode.width,
        mode.height,
        mode.fps,
        id
    );

    // Calibration only holds for the resolution it was taken at.
    let intrinsics = info
        .intrinsics
        .filter(|_| stored.as_ref().and_then(|meta| meta.video_mode) == Some(mode));
    let metadata = CameraMetadata {
        name: info.name.clone(),
        diagonal_fov: info.diagonal_fov,
        video_mode: Some(mode),
        intrinsics: info.intrinsics,
    };
    if let Err(e) = store.save_camera(&id, &metadata) {
        log::warn!("camera {}: failed to save metadata: {:#}", id, e);
    }

    let mut context =
        PipelineContext::new(CameraGeometry::new(info.diagonal_fov, mode.width, mode.height)?);
    context.intrinsics = intrinsics;
    context.detectors = detectors.clone();
    let manager = PipelineManager::load(id.clone(), context, Arc::clone(store))?;

    let mut sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(LogSink::new(cfg.ui_rate_hz))];
    if let Some(dir) = &cfg.stream.snapshot_dir {
        sinks.push(Box::new(JpegSnapshotSink::new(
            dir,
            cfg.stream.jpeg_quality,
            cfg.stream.rate_hz,
        )?));
    }
    if let Some(mqtt) = &cfg.mqtt {
        match MqttTelemetrySink::connect(mqtt, &id) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => log::warn!("camera {}: MQTT telemetry disabled: {:#}", id, e),
        }
    }

    VisionProcess::spawn(source, manager, sinks)
}

fn log_health(handles: &[VisionHandle]) {
    for handle in handles {
        match handle.latest() {
            Some(report) => log::info!(
                "camera {} running={} fps={:.1} latency={:.1}ms targets={} pipeline={:?}",
                handle.camera(),
                handle.is_running(),
                report.fps,
                report.result.latency().as_secs_f64() * 1000.0,
                report.result.targets.len(),
                report.selector
            ),
            None => log::info!(
                "camera {} running={} (no frames yet)",
                handle.camera(),
                handle.is_running()
            ),
        }
    }
}
