use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::camera::CameraId;
use crate::detect::ColorClass;
use crate::ingest::VideoMode;
use crate::transport::MqttSinkConfig;

const DEFAULT_SETTINGS_DIR: &str = "aimpoint-settings";
const DEFAULT_CAMERA_NAME: &str = "front";
const DEFAULT_CAMERA_DEVICE: &str = "stub://front";
const DEFAULT_DIAGONAL_FOV: f64 = 70.0;
const DEFAULT_STREAM_RATE_HZ: f64 = 30.0;
const DEFAULT_UI_RATE_HZ: f64 = 10.0;
const DEFAULT_JPEG_QUALITY: u8 = 75;
const DEFAULT_MQTT_CLIENT_ID: &str = "aimpoint";
const DEFAULT_MQTT_TOPIC_PREFIX: &str = "aimpoint";

#[derive(Debug, Deserialize, Default)]
struct AimpointConfigFile {
    settings_dir: Option<PathBuf>,
    cameras: Option<Vec<CameraConfigFile>>,
    stream: Option<StreamConfigFile>,
    ui: Option<UiConfigFile>,
    mqtt: Option<MqttConfigFile>,
    color_classes: Option<Vec<ColorClassFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    name: Option<String>,
    device: Option<String>,
    diagonal_fov: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    snapshot_dir: Option<PathBuf>,
    rate_hz: Option<f64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct UiConfigFile {
    rate_hz: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    topic_prefix: Option<String>,
    use_tls: Option<bool>,
    max_rate_hz: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ColorClassFile {
    label: String,
    lower: [u8; 3],
    upper: [u8; 3],
}

#[derive(Debug, Clone)]
pub struct AimpointConfig {
    pub settings_dir: PathBuf,
    pub cameras: Vec<CameraConfig>,
    pub stream: StreamSettings,
    pub ui_rate_hz: f64,
    pub mqtt: Option<MqttSinkConfig>,
    pub color_classes: Vec<ColorClass>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    pub name: String,
    pub device: String,
    pub diagonal_fov: f64,
    pub video_mode: VideoMode,
}

impl CameraConfig {
    pub fn id(&self) -> CameraId {
        CameraId::new(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Where JPEG snapshots go; `None` disables the stream sink.
    pub snapshot_dir: Option<PathBuf>,
    pub rate_hz: f64,
    pub jpeg_quality: u8,
}

impl AimpointConfig {
    /// Load from the file named by `AIMPOINT_CONFIG` (if set), then apply
    /// `AIMPOINT_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("AIMPOINT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AimpointConfigFile) -> Result<Self> {
        let settings_dir = file
            .settings_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_DIR));
        let cameras = file
            .cameras
            .unwrap_or_else(|| vec![CameraConfigFile::default()])
            .into_iter()
            .map(|camera| {
                let defaults = VideoMode::default();
                CameraConfig {
                    name: camera
                        .name
                        .unwrap_or_else(|| DEFAULT_CAMERA_NAME.to_string()),
                    device: camera
                        .device
                        .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                    diagonal_fov: camera.diagonal_fov.unwrap_or(DEFAULT_DIAGONAL_FOV),
                    video_mode: VideoMode {
                        width: camera.width.unwrap_or(defaults.width),
                        height: camera.height.unwrap_or(defaults.height),
                        fps: camera.fps.unwrap_or(defaults.fps),
                    },
                }
            })
            .collect();
        let stream = StreamSettings {
            snapshot_dir: file.stream.as_ref().and_then(|s| s.snapshot_dir.clone()),
            rate_hz: file
                .stream
                .as_ref()
                .and_then(|s| s.rate_hz)
                .unwrap_or(DEFAULT_STREAM_RATE_HZ),
            jpeg_quality: file
                .stream
                .as_ref()
                .and_then(|s| s.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        let ui_rate_hz = file
            .ui
            .and_then(|ui| ui.rate_hz)
            .unwrap_or(DEFAULT_UI_RATE_HZ);
        let mqtt = file.mqtt.and_then(|mqtt| {
            let broker = mqtt.broker?;
            Some(MqttSinkConfig {
                broker,
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                username: mqtt.username,
                password: mqtt.password,
                topic_prefix: mqtt
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_MQTT_TOPIC_PREFIX.to_string()),
                use_tls: mqtt.use_tls.unwrap_or(false),
                max_rate_hz: mqtt.max_rate_hz,
            })
        });
        let color_classes = file
            .color_classes
            .unwrap_or_default()
            .into_iter()
            .map(|class| ColorClass {
                label: class.label,
                lower: class.lower,
                upper: class.upper,
            })
            .collect();
        Ok(Self {
            settings_dir,
            cameras,
            stream,
            ui_rate_hz,
            mqtt,
            color_classes,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("AIMPOINT_SETTINGS_DIR") {
            if !dir.trim().is_empty() {
                self.settings_dir = PathBuf::from(dir);
            }
        }
        if let Ok(device) = std::env::var("AIMPOINT_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                if let Some(camera) = self.cameras.first_mut() {
                    camera.device = device;
                }
            }
        }
        if let Ok(dir) = std::env::var("AIMPOINT_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.stream.snapshot_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(rate) = std::env::var("AIMPOINT_STREAM_RATE_HZ") {
            self.stream.rate_hz = rate
                .trim()
                .parse()
                .map_err(|_| anyhow!("AIMPOINT_STREAM_RATE_HZ must be a number"))?;
        }
        if let Ok(broker) = std::env::var("AIMPOINT_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match self.mqtt.as_mut() {
                    Some(mqtt) => mqtt.broker = broker,
                    None => {
                        self.mqtt = Some(MqttSinkConfig {
                            broker,
                            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
                            username: None,
                            password: None,
                            topic_prefix: DEFAULT_MQTT_TOPIC_PREFIX.to_string(),
                            use_tls: false,
                            max_rate_hz: None,
                        })
                    }
                }
            }
        }
        if let Ok(prefix) = std::env::var("AIMPOINT_MQTT_TOPIC_PREFIX") {
            if let Some(mqtt) = self.mqtt.as_mut() {
                if !prefix.trim().is_empty() {
                    mqtt.topic_prefix = prefix;
                }
            }
        }
        if let Ok(password) = std::env::var("AIMPOINT_MQTT_PASSWORD") {
            if let Some(mqtt) = self.mqtt.as_mut() {
                mqtt.password = Some(password);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(anyhow!("camera name must not be empty"));
            }
            if !seen.insert(camera.id()) {
                return Err(anyhow!("duplicate camera id {}", camera.id()));
            }
            if !(camera.diagonal_fov > 0.0 && camera.diagonal_fov < 180.0) {
                return Err(anyhow!(
                    "camera {}: diagonal_fov must be within (0, 180), got {}",
                    camera.name,
                    camera.diagonal_fov
                ));
            }
            if camera.video_mode.width == 0 || camera.video_mode.height == 0 {
                return Err(anyhow!("camera {}: resolution must be non-zero", camera.name));
            }
        }
        if !(self.stream.rate_hz > 0.0) {
            return Err(anyhow!("stream rate must be greater than zero"));
        }
        if !(self.ui_rate_hz > 0.0) {
            return Err(anyhow!("ui rate must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if let Some(mqtt) = &self.mqtt {
            crate::transport::parse_mqtt_endpoint(&mqtt.broker, mqtt.use_tls)?;
            if mqtt.topic_prefix.contains(['#', '+']) {
                return Err(anyhow!("MQTT topic prefix must not contain wildcards"));
            }
            if mqtt.max_rate_hz.is_some_and(|hz| hz <= 0.0) {
                return Err(anyhow!("MQTT max_rate_hz must be greater than zero"));
            }
        }
        for class in &self.color_classes {
            if class.label.trim().is_empty() {
                return Err(anyhow!("color class label must not be empty"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AimpointConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
