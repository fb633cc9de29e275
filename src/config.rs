use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::compliance::{PpeCategory, RequiredSet};
use crate::error::PipelineError;

const DEFAULT_MODEL_PATH: &str = "data/models/best.onnx";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_DEVICE: &str = "cpu";
const DEFAULT_IMAGE_SIZE: u32 = 640;
const DEFAULT_CLASS_NAMES: [&str; 3] = ["helmet", "safety glasses", "gloves"];
const DEFAULT_CAMERA_SOURCE: &str = "0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_LOG_LEVEL: &str = "info";

const SUPPORTED_DEVICES: [&str; 2] = ["cpu", "cuda"];

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    api: Option<ApiConfigFile>,
    stream: Option<StreamConfigFile>,
    required_ppe: Option<Vec<String>>,
    log_level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    device: Option<String>,
    image_size: Option<u32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub model: ModelSettings,
    pub camera: CameraSettings,
    pub api: ApiSettings,
    pub required: RequiredSet,
    pub jpeg_quality: u8,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub confidence_threshold: f32,
    pub device: String,
    pub image_size: u32,
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device index (`"0"`), file path, stream URL or `stub://` descriptor.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
}

impl ApiSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            device: DEFAULT_DEVICE.to_string(),
            image_size: DEFAULT_IMAGE_SIZE,
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_CAMERA_SOURCE.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            fps: DEFAULT_CAMERA_FPS,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            camera: CameraSettings::default(),
            api: ApiSettings::default(),
            required: RequiredSet::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl MonitorConfig {
    /// Defaults, then the JSON file named by `PPE_CONFIG`, then `PPE_*`
    /// environment overrides, then validation.
    pub fn load() -> Result<Self, PipelineError> {
        let config_path = std::env::var("PPE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => MonitorConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self, PipelineError> {
        let defaults = Self::default();
        let model_file = file.model.unwrap_or_default();
        let camera_file = file.camera.unwrap_or_default();
        let api_file = file.api.unwrap_or_default();

        let model = ModelSettings {
            path: model_file.path.unwrap_or(defaults.model.path),
            confidence_threshold: model_file
                .confidence_threshold
                .unwrap_or(defaults.model.confidence_threshold),
            device: model_file.device.unwrap_or(defaults.model.device),
            image_size: model_file.image_size.unwrap_or(defaults.model.image_size),
            class_names: model_file.class_names.unwrap_or(defaults.model.class_names),
        };
        let camera = CameraSettings {
            source: camera_file.source.unwrap_or(defaults.camera.source),
            width: camera_file.width.unwrap_or(defaults.camera.width),
            height: camera_file.height.unwrap_or(defaults.camera.height),
            fps: camera_file.fps.unwrap_or(defaults.camera.fps),
        };
        let api = ApiSettings {
            host: api_file.host.unwrap_or(defaults.api.host),
            port: api_file.port.unwrap_or(defaults.api.port),
        };
        let required = match file.required_ppe {
            Some(names) => parse_required(&names)?,
            None => defaults.required,
        };

        Ok(Self {
            model,
            camera,
            api,
            required,
            jpeg_quality: file
                .stream
                .and_then(|stream| stream.jpeg_quality)
                .unwrap_or(defaults.jpeg_quality),
            log_level: file.log_level.unwrap_or(defaults.log_level),
        })
    }

    fn apply_env(&mut self) -> Result<(), PipelineError> {
        if let Some(path) = env_value("PPE_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(threshold) = env_value("PPE_CONFIDENCE_THRESHOLD") {
            self.model.confidence_threshold = parse_env("PPE_CONFIDENCE_THRESHOLD", &threshold)?;
        }
        if let Some(device) = env_value("PPE_DEVICE") {
            self.model.device = device;
        }
        if let Some(size) = env_value("PPE_IMAGE_SIZE") {
            self.model.image_size = parse_env("PPE_IMAGE_SIZE", &size)?;
        }
        if let Some(names) = env_value("PPE_CLASS_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.model.class_names = parsed;
            }
        }
        if let Some(source) = env_value("PPE_CAMERA_SOURCE") {
            self.camera.source = source;
        }
        if let Some(width) = env_value("PPE_CAMERA_WIDTH") {
            self.camera.width = parse_env("PPE_CAMERA_WIDTH", &width)?;
        }
        if let Some(height) = env_value("PPE_CAMERA_HEIGHT") {
            self.camera.height = parse_env("PPE_CAMERA_HEIGHT", &height)?;
        }
        if let Some(fps) = env_value("PPE_CAMERA_FPS") {
            self.camera.fps = parse_env("PPE_CAMERA_FPS", &fps)?;
        }
        if let Some(host) = env_value("PPE_HOST") {
            self.api.host = host;
        }
        if let Some(port) = env_value("PPE_PORT") {
            self.api.port = parse_env("PPE_PORT", &port)?;
        }
        if let Some(required) = env_value("PPE_REQUIRED") {
            self.required = parse_required(&split_csv(&required))?;
        }
        if let Some(quality) = env_value("PPE_JPEG_QUALITY") {
            self.jpeg_quality = parse_env("PPE_JPEG_QUALITY", &quality)?;
        }
        if let Some(level) = env_value("PPE_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<(), PipelineError> {
        validate_threshold(self.model.confidence_threshold)?;
        self.model.device = self.model.device.to_lowercase();
        if !SUPPORTED_DEVICES.contains(&self.model.device.as_str()) {
            return Err(PipelineError::config(format!(
                "device must be one of {:?}, got '{}'",
                SUPPORTED_DEVICES, self.model.device
            )));
        }
        if self.model.image_size == 0 {
            return Err(PipelineError::config("image_size must be greater than zero"));
        }
        if self.model.class_names.is_empty() {
            return Err(PipelineError::config("class_names must not be empty"));
        }
        if self.camera.source.trim().is_empty() {
            return Err(PipelineError::config("camera source must not be empty"));
        }
        if self.camera.fps == 0 || self.camera.width == 0 || self.camera.height == 0 {
            return Err(PipelineError::config(
                "camera width, height and fps must be greater than zero",
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PipelineError::config("jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }
}

/// Reject thresholds outside `[0, 1]`.
pub fn validate_threshold(threshold: f32) -> Result<(), PipelineError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::config(format!(
            "confidence threshold must be within [0, 1], got {threshold}"
        )));
    }
    Ok(())
}

fn parse_required(names: &[String]) -> Result<RequiredSet, PipelineError> {
    let categories = names
        .iter()
        .map(|name| {
            PpeCategory::from_class_name(name)
                .ok_or_else(|| PipelineError::config(format!("unknown PPE category '{}'", name)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    RequiredSet::new(categories)
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile, PipelineError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| PipelineError::config(format!("invalid config file {}: {}", path.display(), e)))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PipelineError> {
    value
        .parse()
        .map_err(|_| PipelineError::config(format!("{key} has an invalid value '{value}'")))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let mut cfg = MonitorConfig::default();
        cfg.validate().unwrap();
        assert_eq!(
            cfg.required.categories(),
            &[PpeCategory::Helmet, PpeCategory::SafetyGlasses, PpeCategory::Gloves]
        );
        assert_eq!(cfg.api.addr(), "0.0.0.0:5000");
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut cfg = MonitorConfig::default();
        cfg.model.confidence_threshold = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(PipelineError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn unknown_device_is_rejected() {
        let mut cfg = MonitorConfig::default();
        cfg.model.device = "tpu".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn required_names_are_normalized() {
        let set = parse_required(&["Safety Glasses".into(), "helmet".into()]).unwrap();
        assert_eq!(set.categories(), &[PpeCategory::SafetyGlasses, PpeCategory::Helmet]);
        assert!(parse_required(&["cape".into()]).is_err());
        assert!(parse_required(&[]).is_err());
    }
}
