use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_ID: &str = "0";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_MODEL_DIR: &str = "model";
const DEFAULT_MODEL_FILE: &str = "detect.onnx";
const DEFAULT_LABELS_FILE: &str = "coco_labels.txt";
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_MIN_CONF: f32 = 0.5;
const DEFAULT_INPUT_MEAN: f32 = 127.5;
const DEFAULT_INPUT_STD: f32 = 127.5;
const DEFAULT_TARGET_CLASS: usize = 0;
const DEFAULT_ASSET_NAME: &str = "person_detection";
const DEFAULT_STREAM_ADDR: &str = "127.0.0.1:8085";
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 3_000;
const DEFAULT_MQTT_HOST: &str = "127.0.0.1";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_TOPIC: &str = "readings/person_detection";

pub const CONFIG_ENV: &str = "PERSON_DETECTION_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    output: Option<OutputConfigFile>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    id: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    dir: Option<PathBuf>,
    model_file: Option<String>,
    labels_file: Option<String>,
    enable_edge_tpu: Option<bool>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    floating: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    min_conf_threshold: Option<f32>,
    input_mean: Option<f32>,
    input_std: Option<f32>,
    target_class: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    asset_name: Option<String>,
    enable_window: Option<bool>,
    stream_addr: Option<String>,
    shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    kind: Option<SinkKind>,
    path: Option<PathBuf>,
    mqtt_host: Option<String>,
    mqtt_port: Option<u16>,
    mqtt_topic: Option<String>,
    mqtt_client_id: Option<String>,
}

/// Immutable pipeline configuration. Changing it means restarting the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub detection: DetectionSettings,
    pub output: OutputSettings,
    pub sink: SinkSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    /// Capture selector: device index, device path, or `stub://name`.
    pub id: String,
    /// Detection window width; box scaling uses it.
    pub width: u32,
    /// Detection window height; box scaling uses it.
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub dir: PathBuf,
    pub model_file: String,
    pub labels_file: String,
    pub enable_edge_tpu: bool,
    pub input_width: u32,
    pub input_height: u32,
    pub floating: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub min_conf_threshold: f32,
    pub input_mean: f32,
    pub input_std: f32,
    pub target_class: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub asset_name: String,
    pub enable_window: bool,
    /// Preview server bind address; `None` disables the server.
    pub stream_addr: Option<String>,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    #[serde(rename = "jsonl", alias = "json_lines")]
    JsonLines,
    Mqtt,
}

impl SinkKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(SinkKind::Log),
            "jsonl" | "json_lines" => Ok(SinkKind::JsonLines),
            "mqtt" => Ok(SinkKind::Mqtt),
            other => Err(anyhow!("unknown sink kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkSettings {
    pub kind: SinkKind,
    /// Output file for the JSON-lines sink.
    pub path: Option<PathBuf>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
}

impl ModelSettings {
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(&self.model_file)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.dir.join(&self.labels_file)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // Defaults are the parsed form of an empty file.
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Load from the file named by `PERSON_DETECTION_CONFIG` (if set), then env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let sink = file.sink.unwrap_or_default();

        let asset_name = output
            .asset_name
            .unwrap_or_else(|| DEFAULT_ASSET_NAME.to_string());

        Self {
            camera: CameraSettings {
                id: camera.id.unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            },
            model: ModelSettings {
                dir: model.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
                model_file: model
                    .model_file
                    .unwrap_or_else(|| DEFAULT_MODEL_FILE.to_string()),
                labels_file: model
                    .labels_file
                    .unwrap_or_else(|| DEFAULT_LABELS_FILE.to_string()),
                enable_edge_tpu: model.enable_edge_tpu.unwrap_or(false),
                input_width: model.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                input_height: model.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
                floating: model.floating.unwrap_or(false),
            },
            detection: DetectionSettings {
                min_conf_threshold: detection.min_conf_threshold.unwrap_or(DEFAULT_MIN_CONF),
                input_mean: detection.input_mean.unwrap_or(DEFAULT_INPUT_MEAN),
                input_std: detection.input_std.unwrap_or(DEFAULT_INPUT_STD),
                target_class: detection.target_class.unwrap_or(DEFAULT_TARGET_CLASS),
            },
            output: OutputSettings {
                enable_window: output.enable_window.unwrap_or(false),
                stream_addr: output
                    .stream_addr
                    .or_else(|| Some(DEFAULT_STREAM_ADDR.to_string()))
                    .filter(|addr| !addr.trim().is_empty()),
                shutdown_grace: Duration::from_millis(
                    output.shutdown_grace_ms.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
                ),
                asset_name: asset_name.clone(),
            },
            sink: SinkSettings {
                kind: sink.kind.unwrap_or(SinkKind::Log),
                path: sink.path,
                mqtt_host: sink
                    .mqtt_host
                    .unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string()),
                mqtt_port: sink.mqtt_port.unwrap_or(DEFAULT_MQTT_PORT),
                mqtt_topic: sink
                    .mqtt_topic
                    .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                mqtt_client_id: sink.mqtt_client_id.unwrap_or(asset_name),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(id) = std::env::var("PERSON_DETECTION_CAMERA_ID") {
            if !id.trim().is_empty() {
                self.camera.id = id;
            }
        }
        if let Ok(dir) = std::env::var("PERSON_DETECTION_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.model.dir = PathBuf::from(dir);
            }
        }
        if let Ok(model) = std::env::var("PERSON_DETECTION_MODEL_FILE") {
            if !model.trim().is_empty() {
                self.model.model_file = model;
            }
        }
        if let Ok(asset) = std::env::var("PERSON_DETECTION_ASSET_NAME") {
            if !asset.trim().is_empty() {
                self.output.asset_name = asset;
            }
        }
        if let Ok(addr) = std::env::var("PERSON_DETECTION_STREAM_ADDR") {
            self.output.stream_addr = Some(addr).filter(|addr| !addr.trim().is_empty());
        }
        if let Ok(threshold) = std::env::var("PERSON_DETECTION_MIN_CONF") {
            self.detection.min_conf_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("PERSON_DETECTION_MIN_CONF must be a number between 0 and 1")
            })?;
        }
        if let Ok(enable) = std::env::var("PERSON_DETECTION_ENABLE_WINDOW") {
            self.output.enable_window = parse_bool(&enable).ok_or_else(|| {
                anyhow!("PERSON_DETECTION_ENABLE_WINDOW must be true or false")
            })?;
        }
        if let Ok(kind) = std::env::var("PERSON_DETECTION_SINK") {
            self.sink.kind = SinkKind::parse(&kind)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera dimensions must be non-zero, got {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.camera.id.trim().is_empty() {
            return Err(anyhow!("camera id must not be empty"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input dimensions must be non-zero"));
        }
        let threshold = self.detection.min_conf_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "min_conf_threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.model.floating && self.detection.input_std == 0.0 {
            return Err(anyhow!("input_std must be non-zero for floating models"));
        }
        self.output.asset_name = self.output.asset_name.trim().to_string();
        if self.output.asset_name.is_empty() {
            return Err(anyhow!("asset_name must not be empty"));
        }
        if self.sink.kind == SinkKind::JsonLines && self.sink.path.is_none() {
            return Err(anyhow!("jsonl sink requires sink.path"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
