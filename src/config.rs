use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{ChannelOrder, TensorLayout};
use crate::ingest::synthetic::DEFAULT_SYNTHETIC_INDICES;
use crate::ingest::CaptureSettings;
use crate::storage::DEFAULT_HISTORY_CAPACITY;

pub const CONFIG_ENV: &str = "WEAPON_WATCH_CONFIG";

const DEFAULT_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MODEL_PATH: &str = "weapon_detection_model.onnx";
const DEFAULT_CLASSES: [&str; 3] = ["No Weapon", "Knife", "Gun"];
const DEFAULT_BACKGROUND_CLASS: &str = "No Weapon";
const DEFAULT_INPUT_SIZE: u32 = 224;
const DEFAULT_DISPLAY_THRESHOLD: f32 = 0.3;
const DEFAULT_ALERT_THRESHOLD: f32 = 0.3;
const DEFAULT_REQUEST_THRESHOLD: f32 = 0.5;
const DEFAULT_DETECTION_INTERVAL: u64 = 5;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 66;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_DB_PATH: &str = "weapon_detections.db";
const DEFAULT_PERSISTENT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    server: Option<ServerSectionFile>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    camera: Option<CameraConfigFile>,
    history: Option<HistoryConfigFile>,
    screenshots: Option<ScreenshotConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerSectionFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<ModelBackendKind>,
    path: Option<PathBuf>,
    classes: Option<Vec<String>>,
    background_class: Option<String>,
    input_size: Option<u32>,
    layout: Option<TensorLayout>,
    channel_order: Option<ChannelOrder>,
    output: Option<OutputKind>,
    stub_output: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    display_threshold: Option<f32>,
    alert_threshold: Option<f32>,
    request_threshold: Option<f32>,
    detection_interval: Option<u64>,
    frame_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    backend: Option<CameraBackendKind>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    startup_index: Option<u32>,
    synthetic_indices: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct HistoryConfigFile {
    backend: Option<HistoryBackendKind>,
    db_path: Option<String>,
    capacity: Option<usize>,
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ScreenshotConfigFile {
    enabled: Option<bool>,
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackendKind {
    Tract,
    Stub,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Probabilities,
    Logits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendKind {
    Synthetic,
    V4l2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackendKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub model: ModelSettings,
    pub detection: DetectionSettings,
    pub camera: CameraSettings,
    pub history: HistorySettings,
    pub screenshots: ScreenshotSettings,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: ModelBackendKind,
    pub path: PathBuf,
    pub classes: Vec<String>,
    pub background_class: String,
    pub input_size: u32,
    pub layout: TensorLayout,
    pub channel_order: ChannelOrder,
    pub output: OutputKind,
    /// Fixed scores returned by the stub backend.
    pub stub_output: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Minimum confidence for a detection to be drawn and pushed.
    pub display_threshold: f32,
    /// Confidence a weapon must exceed to raise an alert.
    pub alert_threshold: f32,
    /// Default threshold for `/detect` and `/detect_stream`.
    pub request_threshold: f32,
    /// Run inference on every Nth frame.
    pub detection_interval: u64,
    pub frame_interval: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub backend: CameraBackendKind,
    pub capture: CaptureSettings,
    pub startup_index: u32,
    pub synthetic_indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub backend: HistoryBackendKind,
    pub db_path: String,
    pub capacity: usize,
    /// Minimum time between recorded alerts on one stream.
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct ScreenshotSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct OverlaySettings {
    pub font_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Load from `WEAPON_WATCH_CONFIG` (if set), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServerConfigFile) -> Self {
        let addr = file
            .server
            .and_then(|server| server.addr)
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let model_file = file.model.unwrap_or_default();
        let classes = model_file
            .classes
            .unwrap_or_else(|| DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect());
        let stub_output = model_file
            .stub_output
            .unwrap_or_else(|| default_stub_output(classes.len()));
        let model = ModelSettings {
            backend: model_file.backend.unwrap_or_else(default_model_backend),
            path: model_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            background_class: model_file
                .background_class
                .unwrap_or_else(|| DEFAULT_BACKGROUND_CLASS.to_string()),
            input_size: model_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            layout: model_file.layout.unwrap_or_default(),
            channel_order: model_file.channel_order.unwrap_or_default(),
            output: model_file.output.unwrap_or_default(),
            classes,
            stub_output,
        };

        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            display_threshold: detection_file
                .display_threshold
                .unwrap_or(DEFAULT_DISPLAY_THRESHOLD),
            alert_threshold: detection_file
                .alert_threshold
                .unwrap_or(DEFAULT_ALERT_THRESHOLD),
            request_threshold: detection_file
                .request_threshold
                .unwrap_or(DEFAULT_REQUEST_THRESHOLD),
            detection_interval: detection_file
                .detection_interval
                .unwrap_or(DEFAULT_DETECTION_INTERVAL),
            frame_interval: Duration::from_millis(
                detection_file
                    .frame_interval_ms
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
            jpeg_quality: detection_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let camera_file = file.camera.unwrap_or_default();
        let capture_defaults = CaptureSettings::default();
        let camera = CameraSettings {
            backend: camera_file.backend.unwrap_or_else(default_camera_backend),
            capture: CaptureSettings {
                width: camera_file.width.unwrap_or(capture_defaults.width),
                height: camera_file.height.unwrap_or(capture_defaults.height),
                fps: camera_file.fps.unwrap_or(capture_defaults.fps),
            },
            startup_index: camera_file.startup_index.unwrap_or(0),
            synthetic_indices: camera_file
                .synthetic_indices
                .unwrap_or_else(|| DEFAULT_SYNTHETIC_INDICES.to_vec()),
        };

        let history_file = file.history.unwrap_or_default();
        let history_backend = history_file.backend.unwrap_or(HistoryBackendKind::Memory);
        let history = HistorySettings {
            backend: history_backend,
            db_path: history_file
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            capacity: history_file.capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY),
            cooldown: Duration::from_secs(
                history_file
                    .cooldown_secs
                    .unwrap_or_else(|| default_cooldown_secs(history_backend)),
            ),
        };

        let screenshots_file = file.screenshots.unwrap_or_default();
        let screenshots = ScreenshotSettings {
            enabled: screenshots_file.enabled.unwrap_or(false),
            dir: screenshots_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
        };

        let overlay = OverlaySettings {
            font_path: file.overlay.and_then(|overlay| overlay.font_path),
        };

        Self {
            addr,
            model,
            detection,
            camera,
            history,
            screenshots,
            overlay,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("WEAPON_WATCH_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr;
            }
        }
        if let Ok(path) = std::env::var("WEAPON_WATCH_MODEL") {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("WEAPON_WATCH_CAMERA_BACKEND") {
            self.camera.backend = match backend.trim().to_lowercase().as_str() {
                "synthetic" => CameraBackendKind::Synthetic,
                "v4l2" => CameraBackendKind::V4l2,
                other => {
                    return Err(anyhow!(
                        "WEAPON_WATCH_CAMERA_BACKEND must be synthetic or v4l2, got {}",
                        other
                    ))
                }
            };
        }
        if let Ok(db_path) = std::env::var("WEAPON_WATCH_HISTORY_DB") {
            if !db_path.trim().is_empty() {
                self.history.db_path = db_path;
            }
        }
        if let Ok(font) = std::env::var("WEAPON_WATCH_FONT") {
            if !font.trim().is_empty() {
                self.overlay.font_path = Some(PathBuf::from(font));
            }
        }
        if let Ok(threshold) = std::env::var("WEAPON_WATCH_ALERT_THRESHOLD") {
            self.detection.alert_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("WEAPON_WATCH_ALERT_THRESHOLD must be a number"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        for (name, value) in [
            ("display_threshold", detection.display_threshold),
            ("alert_threshold", detection.alert_threshold),
            ("request_threshold", detection.request_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if detection.display_threshold > detection.alert_threshold {
            return Err(anyhow!(
                "display_threshold ({}) must not exceed alert_threshold ({})",
                detection.display_threshold,
                detection.alert_threshold
            ));
        }
        if detection.detection_interval == 0 {
            return Err(anyhow!("detection_interval must be at least 1"));
        }
        if !(1..=100).contains(&detection.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.history.capacity == 0 {
            return Err(anyhow!("history capacity must be at least 1"));
        }
        if self.model.classes.is_empty() {
            return Err(anyhow!("model classes must not be empty"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        if self.camera.capture.width == 0 || self.camera.capture.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(ServerConfigFile::default())
    }
}

fn default_model_backend() -> ModelBackendKind {
    if cfg!(feature = "backend-tract") {
        ModelBackendKind::Tract
    } else {
        ModelBackendKind::Stub
    }
}

fn default_camera_backend() -> CameraBackendKind {
    if cfg!(feature = "ingest-v4l2") {
        CameraBackendKind::V4l2
    } else {
        CameraBackendKind::Synthetic
    }
}

fn default_cooldown_secs(backend: HistoryBackendKind) -> u64 {
    match backend {
        HistoryBackendKind::Sqlite => DEFAULT_PERSISTENT_COOLDOWN_SECS,
        HistoryBackendKind::Memory => 0,
    }
}

/// All weight on the first (background) class.
fn default_stub_output(classes: usize) -> Vec<f32> {
    let mut output = vec![0.0; classes.max(1)];
    output[0] = 1.0;
    output
}

fn read_config_file(path: &Path) -> Result<ServerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<ServerConfig> {
        let file: ServerConfigFile = toml::from_str(raw)?;
        let cfg = ServerConfig::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let cfg = ServerConfig::default();
        cfg.validate()?;
        assert_eq!(cfg.addr, "127.0.0.1:5000");
        assert_eq!(cfg.model.classes, vec!["No Weapon", "Knife", "Gun"]);
        assert_eq!(cfg.detection.detection_interval, 5);
        assert_eq!(cfg.detection.frame_interval, Duration::from_millis(66));
        assert_eq!(cfg.history.cooldown, Duration::ZERO);
        assert_eq!(cfg.model.stub_output, vec![1.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn sqlite_history_defaults_to_a_cooldown() -> Result<()> {
        let cfg = parse("[history]\nbackend = \"sqlite\"\n")?;
        assert_eq!(cfg.history.cooldown, Duration::from_secs(60));

        let cfg = parse("[history]\nbackend = \"sqlite\"\ncooldown_secs = 5\n")?;
        assert_eq!(cfg.history.cooldown, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn display_threshold_above_alert_threshold_is_rejected() {
        let err = parse("[detection]\ndisplay_threshold = 0.6\nalert_threshold = 0.4\n")
            .unwrap_err();
        assert!(err.to_string().contains("must not exceed"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(parse("[detection]\nrequest_threshold = 1.5\n").is_err());
        assert!(parse("[detection]\ndetection_interval = 0\n").is_err());
        assert!(parse("[detection]\njpeg_quality = 0\n").is_err());
        assert!(parse("[history]\ncapacity = 0\n").is_err());
        assert!(parse("[model]\nclasses = []\n").is_err());
    }

    #[test]
    fn model_section_parses_enums() -> Result<()> {
        let cfg = parse(
            "[model]\nbackend = \"stub\"\nlayout = \"nchw\"\nchannel_order = \"bgr\"\noutput = \"logits\"\n",
        )?;
        assert_eq!(cfg.model.backend, ModelBackendKind::Stub);
        assert_eq!(cfg.model.layout, TensorLayout::Nchw);
        assert_eq!(cfg.model.channel_order, ChannelOrder::Bgr);
        assert_eq!(cfg.model.output, OutputKind::Logits);
        Ok(())
    }
}
