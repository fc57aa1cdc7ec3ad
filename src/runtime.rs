//! Per-camera vision process.
//!
//! Each camera runs one detection thread that owns its frame source and
//! pipeline manager. Every loop it drains queued commands, blocks on the next
//! frame, reconfigures on a resolution change, runs the selected pipeline and
//! publishes the result into a `LatestSlot`. Sinks run on their own threads
//! and pull the newest report at their own rate, so the detection loop never
//! waits on a consumer.

use std::collections::VecDeque;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::camera::CameraId;
use crate::ingest::{FrameSource, VideoMode};
use crate::manager::{PipelineManager, PipelineSelector};
use crate::publish::{FrameReport, ResultSink};
use crate::settings::{CameraControls, DriverModeSettings, PipelineSettings};

const FPS_WINDOW: usize = 30;
const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);
const SINK_POLL: Duration = Duration::from_millis(250);
const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 30;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Rolling frames-per-second over the last few frame timestamps.
#[derive(Debug)]
pub struct FpsAverager {
    stamps: VecDeque<Instant>,
    capacity: usize,
}

impl FpsAverager {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: VecDeque::with_capacity(capacity.max(2)),
            capacity: capacity.max(2),
        }
    }

    /// Record a frame completed at `at` and return the updated rate.
    pub fn tick(&mut self, at: Instant) -> f64 {
        if self.stamps.len() == self.capacity {
            self.stamps.pop_front();
        }
        self.stamps.push_back(at);
        self.fps()
    }

    pub fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.stamps.front(), self.stamps.back()) else {
            return 0.0;
        };
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        (self.stamps.len() - 1) as f64 / span
    }
}

/// Single-value mailbox holding the newest published item.
///
/// Publishing swaps a pointer under the lock and wakes waiters; readers clone
/// the `Arc` and never hold the lock while they work.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    value: Option<Arc<T>>,
    version: u64,
    closed: bool,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                version: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the value. Returns its version; versions start at 1.
    pub fn publish(&self, value: Arc<T>) -> u64 {
        let version = {
            let mut state = self.lock();
            state.value = Some(value);
            state.version += 1;
            state.version
        };
        self.ready.notify_all();
        version
    }

    pub fn latest(&self) -> Option<(u64, Arc<T>)> {
        let state = self.lock();
        state.value.clone().map(|v| (state.version, v))
    }

    /// Wait until a version newer than `seen` is published. `None` on timeout
    /// or once the slot is closed with nothing newer.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<(u64, Arc<T>)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.version > seen {
                if let Some(value) = state.value.clone() {
                    return Some((state.version, value));
                }
            }
            if state.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Warn at most once per interval, counting what was suppressed.
struct RateLimitedLog {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl RateLimitedLog {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            suppressed: 0,
        }
    }

    fn warn(&mut self, camera: &CameraId, what: &str, err: impl Display) {
        let now = Instant::now();
        if self.last.is_some_and(|t| now.duration_since(t) < self.interval) {
            self.suppressed += 1;
            return;
        }
        if self.suppressed > 0 {
            log::warn!(
                "camera {}: {}: {} ({} similar suppressed)",
                camera,
                what,
                err,
                self.suppressed
            );
        } else {
            log::warn!("camera {}: {}: {}", camera, what, err);
        }
        self.last = Some(now);
        self.suppressed = 0;
    }
}

/// Commands accepted by a running vision process.
#[derive(Clone, Debug)]
pub enum Command {
    SetPipeline(PipelineSelector),
    SetDriverMode(bool),
    AddPipeline(PipelineSettings),
    RemovePipeline(usize),
    DuplicatePipeline(usize),
    RenamePipeline(usize, String),
    UpdateSettings(usize, PipelineSettings),
    UpdateDriverMode(DriverModeSettings),
    SetVideoMode(VideoMode),
}

/// Manager state after a command was applied.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManagerState {
    pub selector: PipelineSelector,
    pub pipelines: Vec<String>,
}

struct Request {
    command: Command,
    reply: Sender<Result<ManagerState>>,
}

/// Entry point for starting a camera's detection loop.
pub struct VisionProcess;

impl VisionProcess {
    pub fn spawn(
        source: Box<dyn FrameSource>,
        manager: PipelineManager,
        sinks: Vec<Box<dyn ResultSink>>,
    ) -> Result<VisionHandle> {
        let camera = manager.camera().clone();
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let slot = Arc::new(LatestSlot::new());

        let mut sink_threads = Vec::with_capacity(sinks.len());
        for sink in sinks {
            let name = format!("aimpoint-{}-{}", camera, sink.name());
            let slot = Arc::clone(&slot);
            let camera = camera.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_sink(camera, sink, slot))
                .with_context(|| format!("spawn {}", name))?;
            sink_threads.push(handle);
        }

        let worker = DetectionLoop {
            camera: camera.clone(),
            source,
            manager,
            commands: command_rx,
            stop: Arc::clone(&stop),
            slot: Arc::clone(&slot),
            applied_controls: None,
        };
        let thread = thread::Builder::new()
            .name(format!("aimpoint-{}", camera))
            .spawn(move || worker.run());
        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                slot.close();
                return Err(anyhow!("spawn vision thread for {}: {}", camera, err));
            }
        };
        log::info!("camera {}: vision process started", camera);

        Ok(VisionHandle {
            camera,
            commands,
            stop,
            slot,
            thread: Some(thread),
            sink_threads,
        })
    }
}

/// Control surface for a running vision process. Dropping it stops the process.
pub struct VisionHandle {
    camera: CameraId,
    commands: Sender<Request>,
    stop: Arc<AtomicBool>,
    slot: Arc<LatestSlot<FrameReport>>,
    thread: Option<JoinHandle<()>>,
    sink_threads: Vec<JoinHandle<()>>,
}

impl VisionHandle {
    pub fn camera(&self) -> &CameraId {
        &self.camera
    }

    /// Queue `command` and wait until the detection thread has applied it.
    pub fn send(&self, command: Command, timeout: Duration) -> Result<ManagerState> {
        let (reply, reply_rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(Request { command, reply })
            .map_err(|_| anyhow!("camera {}: vision process is not running", self.camera))?;
        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(anyhow!(
                "camera {}: command not applied within {:?}",
                self.camera,
                timeout
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow!("camera {}: vision process stopped", self.camera))
            }
        }
    }

    pub fn set_pipeline(&self, selector: PipelineSelector) -> Result<ManagerState> {
        self.send(Command::SetPipeline(selector), DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn set_driver_mode(&self, enabled: bool) -> Result<ManagerState> {
        self.send(Command::SetDriverMode(enabled), DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn update_settings(&self, index: usize, settings: PipelineSettings) -> Result<ManagerState> {
        self.send(Command::UpdateSettings(index, settings), DEFAULT_COMMAND_TIMEOUT)
    }

    /// Newest published report, if any frame has been processed.
    pub fn latest(&self) -> Option<Arc<FrameReport>> {
        self.slot.latest().map(|(_, report)| report)
    }

    /// Wait for a report produced after `sequence`.
    pub fn wait_for_report(&self, after_sequence: u64, timeout: Duration) -> Option<Arc<FrameReport>> {
        let deadline = Instant::now() + timeout;
        let mut seen = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (version, report) = self.slot.wait_newer(seen, remaining)?;
            if report.result.sequence > after_sequence {
                return Some(report);
            }
            seen = version;
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the detection loop and every sink, waiting for their threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        let mut panicked = false;
        if let Some(thread) = self.thread.take() {
            panicked |= thread.join().is_err();
        }
        self.slot.close();
        for sink in self.sink_threads.drain(..) {
            panicked |= sink.join().is_err();
        }
        if panicked {
            return Err(anyhow!("camera {}: a vision thread panicked", self.camera));
        }
        log::info!("camera {}: vision process stopped", self.camera);
        Ok(())
    }
}

impl Drop for VisionHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(err) = self.shutdown() {
                log::warn!("{:#}", err);
            }
        }
    }
}

struct DetectionLoop {
    camera: CameraId,
    source: Box<dyn FrameSource>,
    manager: PipelineManager,
    commands: Receiver<Request>,
    stop: Arc<AtomicBool>,
    slot: Arc<LatestSlot<FrameReport>>,
    applied_controls: Option<CameraControls>,
}

impl DetectionLoop {
    fn run(mut self) {
        let mut fps = FpsAverager::new(FPS_WINDOW);
        let mut frame_errors = RateLimitedLog::new(ERROR_LOG_INTERVAL);
        let mut source_errors = RateLimitedLog::new(ERROR_LOG_INTERVAL);
        let mut consecutive_source_errors = 0u32;
        let mut last_good: Option<Arc<FrameReport>> = None;
        self.apply_camera_controls();

        while !self.stop.load(Ordering::Acquire) {
            self.drain_commands();

            let frame = match self.source.get_frame() {
                Ok(frame) => {
                    consecutive_source_errors = 0;
                    frame
                }
                Err(err) => {
                    consecutive_source_errors += 1;
                    if !self.source.is_healthy()
                        || consecutive_source_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS
                    {
                        log::error!(
                            "camera {}: source {} failed: {:#}",
                            self.camera,
                            self.source.name(),
                            err
                        );
                        break;
                    }
                    source_errors.warn(&self.camera, "frame capture failed", format!("{:#}", err));
                    self.republish(&last_good, fps.fps());
                    continue;
                }
            };

            let geometry = self.manager.context().geometry;
            let (width, height) = frame.dimensions();
            if (width, height) != (geometry.width, geometry.height) {
                log::info!(
                    "camera {}: resolution changed to {}x{}",
                    self.camera,
                    width,
                    height
                );
                if let Err(err) = self.manager.set_resolution(width, height) {
                    frame_errors.warn(&self.camera, "reconfigure failed", format!("{:#}", err));
                    self.republish(&last_good, fps.fps());
                    continue;
                }
            }

            match catch_unwind(AssertUnwindSafe(|| self.manager.process(frame))) {
                Ok(Ok(result)) => {
                    let report = FrameReport {
                        camera: self.camera.clone(),
                        result: Arc::new(result),
                        fps: fps.tick(Instant::now()),
                        selector: self.manager.selector(),
                    };
                    let report = Arc::new(report);
                    self.slot.publish(Arc::clone(&report));
                    last_good = Some(report);
                }
                Ok(Err(err)) => {
                    frame_errors.warn(&self.camera, "frame skipped", format!("{:#}", err));
                    self.republish(&last_good, fps.fps());
                }
                Err(panic) => {
                    frame_errors.warn(&self.camera, "pipeline panicked", panic_message(&*panic));
                    self.republish(&last_good, fps.fps());
                }
            }
        }

        self.slot.close();
    }

    /// Hand the last good result to the sinks again after a failed frame.
    fn republish(&self, last_good: &Option<Arc<FrameReport>>, fps: f64) {
        if let Some(last) = last_good {
            self.slot.publish(Arc::new(FrameReport {
                fps,
                ..FrameReport::clone(last)
            }));
        }
    }

    fn drain_commands(&mut self) {
        let mut applied = false;
        while let Ok(request) = self.commands.try_recv() {
            let outcome = self.apply(request.command);
            if let Err(err) = &outcome {
                log::warn!("camera {}: command rejected: {:#}", self.camera, err);
            }
            let _ = request.reply.send(outcome);
            applied = true;
        }
        if applied {
            self.apply_camera_controls();
        }
    }

    fn apply(&mut self, command: Command) -> Result<ManagerState> {
        match command {
            Command::SetPipeline(selector) => self.manager.set_current(selector)?,
            Command::SetDriverMode(enabled) => self.manager.set_driver_mode(enabled)?,
            Command::AddPipeline(settings) => {
                self.manager.add_pipeline(settings)?;
            }
            Command::RemovePipeline(index) => self.manager.remove_pipeline(index)?,
            Command::DuplicatePipeline(index) => {
                self.manager.duplicate_pipeline(index)?;
            }
            Command::RenamePipeline(index, name) => self.manager.rename_pipeline(index, &name)?,
            Command::UpdateSettings(index, settings) => {
                self.manager.update_settings(index, settings)?
            }
            Command::UpdateDriverMode(settings) => self.manager.update_driver_mode(settings),
            Command::SetVideoMode(mode) => self.source.set_video_mode(mode)?,
        }
        Ok(ManagerState {
            selector: self.manager.selector(),
            pipelines: self.manager.names().into_iter().map(String::from).collect(),
        })
    }

    /// Push the active pipeline's camera controls to the source. Failures are
    /// logged and otherwise ignored.
    fn apply_camera_controls(&mut self) {
        let controls = self.manager.current_camera_controls();
        if self.applied_controls == Some(controls) {
            return;
        }
        let outcomes = [
            (
                "exposure",
                controls.exposure.map(|v| (v, self.source.set_exposure(v))),
            ),
            (
                "brightness",
                controls.brightness.map(|v| (v, self.source.set_brightness(v))),
            ),
            ("gain", controls.gain.map(|v| (v, self.source.set_gain(v)))),
        ];
        for (control, outcome) in outcomes {
            if let Some((value, Err(err))) = outcome {
                log::warn!(
                    "camera {}: could not set {} to {}: {:#}",
                    self.camera,
                    control,
                    value,
                    err
                );
            }
        }
        self.applied_controls = Some(controls);
    }
}

fn run_sink(camera: CameraId, mut sink: Box<dyn ResultSink>, slot: Arc<LatestSlot<FrameReport>>) {
    let min_interval = sink
        .max_rate_hz()
        .filter(|hz| *hz > 0.0)
        .map(|hz| Duration::from_secs_f64(1.0 / hz));
    let mut errors = RateLimitedLog::new(ERROR_LOG_INTERVAL);
    let mut seen = 0;
    let mut next_allowed = Instant::now();

    loop {
        if let Some(wait) = next_allowed.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
        let Some((version, report)) = slot.wait_newer(seen, SINK_POLL) else {
            if slot.is_closed() {
                break;
            }
            continue;
        };
        seen = version;
        let started = Instant::now();
        if let Err(err) = sink.publish(&report) {
            errors.warn(&camera, &format!("{} sink failed", sink.name()), format!("{:#}", err));
        }
        if let Some(interval) = min_interval {
            next_allowed = started + interval;
        }
    }

    if let Err(err) = sink.close() {
        log::warn!("camera {}: closing {} sink: {:#}", camera, sink.name(), err);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
