//! Per-camera collection of named pipelines and the active selection.
//!
//! The manager owns every compiled pipeline for one camera plus the driver
//! mode pipeline. Indices follow list order and are recomputed by position
//! after every mutation. Mutations are written back to the settings store
//! when one is attached; store failures are logged and never undo the change.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

use crate::camera::CameraId;
use crate::frame::Frame;
use crate::pipeline::{
    build_pipeline, DriverModePipeline, PipelineContext, PipelineResult, VisionPipeline,
};
use crate::settings::{CameraControls, DriverModeSettings, PipelineSettings};
use crate::store::{SettingsStore, StoredPipelines};

pub const DEFAULT_PIPELINE_NAME: &str = "Default";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum PipelineSelector {
    Detection(usize),
    DriverMode,
}

struct PipelineEntry {
    settings: PipelineSettings,
    pipeline: Box<dyn VisionPipeline>,
}

pub struct PipelineManager {
    camera: CameraId,
    context: PipelineContext,
    entries: Vec<PipelineEntry>,
    driver_mode: DriverModePipeline,
    selector: PipelineSelector,
    last_detection: usize,
    store: Option<Arc<dyn SettingsStore>>,
}

impl PipelineManager {
    /// Build from stored settings. Unbuildable pipelines are skipped; an empty
    /// result falls back to a single default pipeline.
    pub fn new(camera: CameraId, context: PipelineContext, stored: StoredPipelines) -> Result<Self> {
        let mut entries = Vec::with_capacity(stored.pipelines.len());
        let mut names = HashSet::new();
        for settings in stored.pipelines {
            if !names.insert(settings.name.clone()) {
                log::warn!(
                    "camera {}: duplicate pipeline name {:?} skipped",
                    camera,
                    settings.name
                );
                continue;
            }
            match build_pipeline(&settings, &context) {
                Ok(pipeline) => entries.push(PipelineEntry { settings, pipeline }),
                Err(err) => log::warn!(
                    "camera {}: pipeline {:?} skipped: {:#}",
                    camera,
                    settings.name,
                    err
                ),
            }
        }
        if entries.is_empty() {
            log::info!("camera {}: no pipelines configured; using default", camera);
            let settings = PipelineSettings::named(DEFAULT_PIPELINE_NAME);
            let pipeline = build_pipeline(&settings, &context)?;
            entries.push(PipelineEntry { settings, pipeline });
        }

        let current = if stored.current_index < entries.len() {
            stored.current_index
        } else {
            log::warn!(
                "camera {}: stored pipeline index {} out of range; using 0",
                camera,
                stored.current_index
            );
            0
        };

        Ok(Self {
            camera,
            context,
            entries,
            driver_mode: DriverModePipeline::new(stored.driver_mode),
            selector: PipelineSelector::Detection(current),
            last_detection: current,
            store: None,
        })
    }

    /// Load from `store`, falling back to defaults when nothing usable is stored.
    pub fn load(
        camera: CameraId,
        context: PipelineContext,
        store: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        let stored = match store.load_pipelines(&camera) {
            Ok(Some(stored)) => stored,
            Ok(None) => StoredPipelines::default(),
            Err(err) => {
                log::warn!("camera {}: stored pipelines unreadable: {:#}", camera, err);
                StoredPipelines::default()
            }
        };
        let mut manager = Self::new(camera, context, stored)?;
        manager.store = Some(store);
        manager.persist();
        Ok(manager)
    }

    pub fn camera(&self) -> &CameraId {
        &self.camera
    }

    pub fn selector(&self) -> PipelineSelector {
        self.selector
    }

    pub fn is_driver_mode(&self) -> bool {
        self.selector == PipelineSelector::DriverMode
    }

    /// Index of the active detection pipeline, `None` in driver mode.
    pub fn current_index(&self) -> Option<usize> {
        match self.selector {
            PipelineSelector::Detection(index) => Some(index),
            PipelineSelector::DriverMode => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.settings.name.as_str()).collect()
    }

    pub fn settings(&self, index: usize) -> Option<&PipelineSettings> {
        self.entries.get(index).map(|e| &e.settings)
    }

    pub fn driver_mode_settings(&self) -> &DriverModeSettings {
        self.driver_mode.settings()
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn set_current(&mut self, selector: PipelineSelector) -> Result<()> {
        if let PipelineSelector::Detection(index) = selector {
            let entry = self
                .entries
                .get_mut(index)
                .ok_or_else(|| anyhow!("no pipeline at index {}", index))?;
            entry
                .pipeline
                .configure(&entry.settings, &self.context)
                .with_context(|| format!("configure pipeline {:?}", entry.settings.name))?;
            self.last_detection = index;
        }
        if self.selector != selector {
            log::info!("camera {}: switched to {:?}", self.camera, selector);
        }
        self.selector = selector;
        self.persist();
        Ok(())
    }

    /// Enter driver mode, or return to the detection pipeline that was active
    /// before it.
    pub fn set_driver_mode(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.set_current(PipelineSelector::DriverMode)
        } else {
            let index = self.last_detection.min(self.entries.len() - 1);
            self.set_current(PipelineSelector::Detection(index))
        }
    }

    /// Append a pipeline, renaming it if its name is taken. Returns its index.
    pub fn add_pipeline(&mut self, mut settings: PipelineSettings) -> Result<usize> {
        settings.name = self.unique_name(&settings.name);
        let pipeline = build_pipeline(&settings, &self.context)?;
        self.entries.push(PipelineEntry { settings, pipeline });
        self.persist();
        Ok(self.entries.len() - 1)
    }

    pub fn remove_pipeline(&mut self, index: usize) -> Result<()> {
        if index >= self.entries.len() {
            bail!("no pipeline at index {}", index);
        }
        if self.entries.len() == 1 {
            bail!("cannot remove the last pipeline");
        }
        let removed = self.entries.remove(index);
        log::info!("camera {}: removed pipeline {:?}", self.camera, removed.settings.name);

        let shift = |i: usize| if i > index { i - 1 } else { i };
        self.last_detection = shift(self.last_detection).min(self.entries.len() - 1);
        if let PipelineSelector::Detection(current) = self.selector {
            let next = shift(current).min(self.entries.len() - 1);
            if current == index {
                return self.set_current(PipelineSelector::Detection(next));
            }
            self.selector = PipelineSelector::Detection(next);
        }
        self.persist();
        Ok(())
    }

    /// Append a deep copy of the pipeline at `index`. Returns the copy's index.
    pub fn duplicate_pipeline(&mut self, index: usize) -> Result<usize> {
        let mut settings = self
            .settings(index)
            .cloned()
            .ok_or_else(|| anyhow!("no pipeline at index {}", index))?;
        settings.name = format!("{} (Copy)", settings.name);
        self.add_pipeline(settings)
    }

    pub fn rename_pipeline(&mut self, index: usize, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("pipeline name must not be empty");
        }
        if self.position_of(name).is_some_and(|i| i != index) {
            bail!("a pipeline named {:?} already exists", name);
        }
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| anyhow!("no pipeline at index {}", index))?;
        entry.settings.name = name.to_string();
        self.persist();
        Ok(())
    }

    /// Replace a pipeline's settings; the pipeline is reconfigured before the
    /// next frame it processes.
    pub fn update_settings(&mut self, index: usize, mut settings: PipelineSettings) -> Result<()> {
        settings.name = settings.name.trim().to_string();
        if settings.name.is_empty() {
            bail!("pipeline name must not be empty");
        }
        if self.position_of(&settings.name).is_some_and(|i| i != index) {
            bail!("a pipeline named {:?} already exists", settings.name);
        }
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| anyhow!("no pipeline at index {}", index))?;
        if entry.pipeline.pipeline_type() == settings.pipeline_type {
            entry.pipeline.configure(&settings, &self.context)?;
        } else {
            entry.pipeline = build_pipeline(&settings, &self.context)?;
        }
        entry.settings = settings;
        self.persist();
        Ok(())
    }

    pub fn update_driver_mode(&mut self, settings: DriverModeSettings) {
        self.driver_mode.configure(settings);
        self.persist();
    }

    /// Rebuild geometry for a new source resolution and reconfigure every
    /// pipeline against it.
    pub fn set_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        let geometry = self.context.geometry.with_resolution(width, height)?;
        let mut context = self.context.clone();
        context.geometry = geometry;
        self.set_context(context)
    }

    pub fn set_context(&mut self, context: PipelineContext) -> Result<()> {
        self.context = context;
        for entry in &mut self.entries {
            entry
                .pipeline
                .configure(&entry.settings, &self.context)
                .with_context(|| format!("configure pipeline {:?}", entry.settings.name))?;
        }
        Ok(())
    }

    pub fn current_camera_controls(&self) -> CameraControls {
        match self.selector {
            PipelineSelector::Detection(index) => self
                .entries
                .get(index)
                .map(|e| e.pipeline.camera_controls())
                .unwrap_or_default(),
            PipelineSelector::DriverMode => self.driver_mode.camera_controls(),
        }
    }

    /// Run the selected pipeline on one frame.
    pub fn process(&mut self, frame: Frame) -> Result<PipelineResult> {
        match self.selector {
            PipelineSelector::Detection(index) => {
                let entry = self
                    .entries
                    .get_mut(index)
                    .ok_or_else(|| anyhow!("no pipeline at index {}", index))?;
                entry.pipeline.process(frame)
            }
            PipelineSelector::DriverMode => self.driver_mode.process(frame),
        }
    }

    pub fn snapshot(&self) -> StoredPipelines {
        StoredPipelines {
            pipelines: self.entries.iter().map(|e| e.settings.clone()).collect(),
            current_index: self.last_detection,
            driver_mode: self.driver_mode.settings().clone(),
        }
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.settings.name == name)
    }

    fn unique_name(&self, base: &str) -> String {
        let base = if base.trim().is_empty() {
            "New Pipeline"
        } else {
            base.trim()
        };
        if self.position_of(base).is_none() {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{} {}", base, n))
            .find(|candidate| self.position_of(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.save_pipelines(&self.camera, &self.snapshot()) {
            log::warn!("camera {}: failed to save pipelines: {:#}", self.camera, err);
        }
    }
}
