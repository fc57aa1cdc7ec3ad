//! Persistence for pipeline collections and camera metadata.
//!
//! Stores are keyed by `CameraId`. The JSON directory store writes one
//! directory per camera with `pipelines.json` and `camera.json`; writes go to
//! a temporary file first and are renamed into place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::camera::{CameraId, CameraIntrinsics};
use crate::ingest::VideoMode;
use crate::settings::{DriverModeSettings, PipelineSettings};

/// Everything the pipeline manager persists for one camera.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredPipelines {
    pub pipelines: Vec<PipelineSettings>,
    pub current_index: usize,
    pub driver_mode: DriverModeSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraMetadata {
    pub name: String,
    pub diagonal_fov: f64,
    #[serde(default)]
    pub video_mode: Option<VideoMode>,
    #[serde(default)]
    pub intrinsics: Option<CameraIntrinsics>,
}

pub trait SettingsStore: Send + Sync {
    fn load_pipelines(&self, camera: &CameraId) -> Result<Option<StoredPipelines>>;

    fn save_pipelines(&self, camera: &CameraId, pipelines: &StoredPipelines) -> Result<()>;

    fn load_camera(&self, camera: &CameraId) -> Result<Option<CameraMetadata>>;

    fn save_camera(&self, camera: &CameraId, metadata: &CameraMetadata) -> Result<()>;
}

#[derive(Default)]
pub struct InMemorySettingsStore {
    pipelines: Mutex<HashMap<CameraId, StoredPipelines>>,
    cameras: Mutex<HashMap<CameraId, CameraMetadata>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn load_pipelines(&self, camera: &CameraId) -> Result<Option<StoredPipelines>> {
        let map = self
            .pipelines
            .lock()
            .map_err(|_| anyhow!("pipeline store lock poisoned"))?;
        Ok(map.get(camera).cloned())
    }

    fn save_pipelines(&self, camera: &CameraId, pipelines: &StoredPipelines) -> Result<()> {
        let mut map = self
            .pipelines
            .lock()
            .map_err(|_| anyhow!("pipeline store lock poisoned"))?;
        map.insert(camera.clone(), pipelines.clone());
        Ok(())
    }

    fn load_camera(&self, camera: &CameraId) -> Result<Option<CameraMetadata>> {
        let map = self
            .cameras
            .lock()
            .map_err(|_| anyhow!("camera store lock poisoned"))?;
        Ok(map.get(camera).cloned())
    }

    fn save_camera(&self, camera: &CameraId, metadata: &CameraMetadata) -> Result<()> {
        let mut map = self
            .cameras
            .lock()
            .map_err(|_| anyhow!("camera store lock poisoned"))?;
        map.insert(camera.clone(), metadata.clone());
        Ok(())
    }
}

pub struct JsonDirSettingsStore {
    root: PathBuf,
}

impl JsonDirSettingsStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create settings directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, camera: &CameraId, file: &str) -> PathBuf {
        self.root.join(camera.as_str()).join(file)
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let value =
            serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(value))
    }

    fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }
}

impl SettingsStore for JsonDirSettingsStore {
    fn load_pipelines(&self, camera: &CameraId) -> Result<Option<StoredPipelines>> {
        self.read(&self.path(camera, "pipelines.json"))
    }

    fn save_pipelines(&self, camera: &CameraId, pipelines: &StoredPipelines) -> Result<()> {
        self.write(&self.path(camera, "pipelines.json"), pipelines)
    }

    fn load_camera(&self, camera: &CameraId) -> Result<Option<CameraMetadata>> {
        self.read(&self.path(camera, "camera.json"))
    }

    fn save_camera(&self, camera: &CameraId, metadata: &CameraMetadata) -> Result<()> {
        self.write(&self.path(camera, "camera.json"), metadata)
    }
}
