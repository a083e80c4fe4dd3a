use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{DetectionFilter, DetectionRequest, PERSON_CLASS_ID};
use crate::ingest::StreamSettings;
use crate::notify::TelegramConfig;
use crate::pipeline::LoopSettings;
use crate::sampler::BoostPolicy;

const DEFAULT_CAMERA_NAME: &str = "Cam1";
const DEFAULT_RTSP_HOST: &str = "192.168.0.61:554";
const DEFAULT_RTSP_PATH: &str = "/cam/realmonitor?channel=1&subtype=0";
const DEFAULT_RESET_SECS: u64 = 7;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.85;
const DEFAULT_MIN_BOX_WIDTH: u32 = 25;
const DEFAULT_MIN_BOX_HEIGHT: u32 = 50;
const DEFAULT_FRAME_SKIP: u32 = 5;
const DEFAULT_DETECTION_MAX_WIDTH: u32 = 640;
const DEFAULT_JPEG_QUALITY: u8 = 95;
const DEFAULT_CROP_PADDING: f32 = 0.15;
const DEFAULT_LATENCY_BUDGET_MS: u64 = 250;
const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 5;
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 30;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    camera_name: Option<String>,
    stream: Option<StreamConfigFile>,
    detection: Option<DetectionConfigFile>,
    presence: Option<PresenceConfigFile>,
    snapshot: Option<SnapshotConfigFile>,
    telegram: Option<TelegramConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    host: Option<String>,
    path: Option<String>,
    user: Option<String>,
    password: Option<String>,
    use_substream: Option<bool>,
    reconnect_backoff_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    face_model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    min_confidence: Option<f32>,
    min_box_width: Option<u32>,
    min_box_height: Option<u32>,
    frame_skip: Option<u32>,
    max_width: Option<u32>,
    latency_budget_ms: Option<u64>,
    boost_policy: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PresenceConfigFile {
    reset_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    jpeg_quality: Option<u8>,
    crop_padding: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    token: Option<String>,
    chat_id: Option<String>,
    timeout_secs: Option<u64>,
}

/// Which detector implementation to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    /// Scripted backend that reports nothing; for dry runs against `stub://`.
    Stub,
    /// YOLOv8 ONNX model through tract (feature `backend-tract`).
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected stub or tract",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub face_model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub min_confidence: f32,
    pub min_box_width: u32,
    pub min_box_height: u32,
    pub frame_skip: u32,
    pub max_width: u32,
    pub latency_budget: Duration,
    pub boost_policy: BoostPolicy,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub jpeg_quality: u8,
    pub crop_padding: f32,
}

#[derive(Clone)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_id: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub camera_name: String,
    pub stream: StreamSettings,
    pub reconnect_backoff: Duration,
    pub detection: DetectorSettings,
    pub reset_window: Duration,
    pub snapshot: SnapshotSettings,
    pub telegram: TelegramSettings,
}

impl AppConfig {
    /// File (`ARRIVAL_CONFIG`), then environment overrides, then range checks.
    /// Missing notifier credentials are an error.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ARRIVAL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `ARRIVAL_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AppConfigFile::default(),
        };
        let (mut cfg, mut credentials) = Self::from_file(file_cfg)?;
        cfg.apply_env(&mut credentials)?;
        cfg.telegram = credentials.into_settings(cfg.telegram.timeout)?;
        cfg.validate();
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<(Self, Credentials)> {
        let stream_file = file.stream.unwrap_or_default();
        let detection_file = file.detection.unwrap_or_default();
        let snapshot_file = file.snapshot.unwrap_or_default();
        let telegram_file = file.telegram.unwrap_or_default();

        let stream = StreamSettings {
            url: stream_file.url,
            host: stream_file
                .host
                .unwrap_or_else(|| DEFAULT_RTSP_HOST.to_string()),
            path: stream_file
                .path
                .unwrap_or_else(|| DEFAULT_RTSP_PATH.to_string()),
            user: stream_file.user,
            password: stream_file.password,
            use_substream: stream_file.use_substream.unwrap_or(true),
        };
        let detection = DetectorSettings {
            backend: match detection_file.backend.as_deref() {
                Some(backend) => backend.parse()?,
                None => DetectorKind::Stub,
            },
            model_path: detection_file.model_path,
            face_model_path: detection_file.face_model_path,
            confidence_threshold: detection_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            min_confidence: detection_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            min_box_width: detection_file.min_box_width.unwrap_or(DEFAULT_MIN_BOX_WIDTH),
            min_box_height: detection_file
                .min_box_height
                .unwrap_or(DEFAULT_MIN_BOX_HEIGHT),
            frame_skip: detection_file.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP),
            max_width: detection_file
                .max_width
                .unwrap_or(DEFAULT_DETECTION_MAX_WIDTH),
            latency_budget: Duration::from_millis(
                detection_file
                    .latency_budget_ms
                    .unwrap_or(DEFAULT_LATENCY_BUDGET_MS),
            ),
            boost_policy: match detection_file.boost_policy.as_deref() {
                Some(policy) => policy.parse()?,
                None => BoostPolicy::default(),
            },
        };
        let cfg = Self {
            camera_name: file
                .camera_name
                .unwrap_or_else(|| DEFAULT_CAMERA_NAME.to_string()),
            stream,
            reconnect_backoff: Duration::from_secs(
                stream_file
                    .reconnect_backoff_secs
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF_SECS),
            ),
            detection,
            reset_window: Duration::from_secs(
                file.presence
                    .and_then(|presence| presence.reset_seconds)
                    .unwrap_or(DEFAULT_RESET_SECS),
            ),
            snapshot: SnapshotSettings {
                jpeg_quality: snapshot_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                crop_padding: snapshot_file.crop_padding.unwrap_or(DEFAULT_CROP_PADDING),
            },
            telegram: TelegramSettings {
                token: String::new(),
                chat_id: String::new(),
                timeout: Duration::from_secs(
                    telegram_file
                        .timeout_secs
                        .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
                ),
            },
        };
        let credentials = Credentials {
            token: telegram_file.token,
            chat_id: telegram_file.chat_id,
        };
        Ok((cfg, credentials))
    }

    fn apply_env(&mut self, credentials: &mut Credentials) -> Result<()> {
        if let Some(name) = env_string("CAMERA_NAME") {
            self.camera_name = name;
        }

        if let Some(url) = env_string("RTSP_URL") {
            self.stream.url = Some(url);
        }
        if let Some(host) = env_string("RTSP_HOST") {
            self.stream.host = host;
        }
        if let Some(path) = env_string("RTSP_PATH") {
            self.stream.path = path;
        }
        if let Some(user) = env_string("RTSP_USER") {
            self.stream.user = Some(user);
        }
        if let Some(password) = env_string("RTSP_PASSWORD") {
            self.stream.password = Some(password);
        }
        if let Some(subtype) = env_string("RTSP_SUBTYPE") {
            self.stream.use_substream = subtype != "0";
        }
        if let Some(secs) = env_number::<u64>("RECONNECT_BACKOFF_SECS") {
            self.reconnect_backoff = Duration::from_secs(secs);
        }

        let detection = &mut self.detection;
        if let Some(backend) = env_string("DETECTOR_BACKEND") {
            detection.backend = backend.parse()?;
        }
        if let Some(path) = env_string("DETECTOR_MODEL_PATH") {
            detection.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_string("FACE_MODEL_PATH") {
            detection.face_model_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_float("CONFIDENCE_THRESHOLD") {
            detection.confidence_threshold = value;
        }
        if let Some(value) = env_float("MIN_CONFIDENCE") {
            detection.min_confidence = value;
        }
        if let Some(value) = env_number("MIN_BOX_WIDTH") {
            detection.min_box_width = value;
        }
        if let Some(value) = env_number("MIN_BOX_HEIGHT") {
            detection.min_box_height = value;
        }
        if let Some(value) = env_number("FRAME_SKIP") {
            detection.frame_skip = value;
        }
        if let Some(value) = env_number("DETECTION_MAX_WIDTH") {
            detection.max_width = value;
        }
        if let Some(ms) = env_number::<u64>("LATENCY_BUDGET_MS") {
            detection.latency_budget = Duration::from_millis(ms);
        }
        if let Some(policy) = env_string("BOOST_POLICY") {
            detection.boost_policy = policy.parse()?;
        }

        if let Some(secs) = env_number::<u64>("NO_PERSON_RESET_SECONDS") {
            self.reset_window = Duration::from_secs(secs);
        }
        if let Some(value) = env_number("JPEG_QUALITY") {
            self.snapshot.jpeg_quality = value;
        }
        if let Some(value) = env_float("CROP_PADDING") {
            self.snapshot.crop_padding = value;
        }

        let token = env_string("TELEGRAM_TOKEN").or_else(|| env_string("TELEGRAM_BOT_TOKEN"));
        if let Some(token) = token {
            credentials.token = Some(token);
        }
        if let Some(chat_id) = env_string("TELEGRAM_CHAT_ID") {
            credentials.chat_id = Some(chat_id);
        }
        if let Some(secs) = env_number::<u64>("NOTIFY_TIMEOUT_SECS") {
            self.telegram.timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// Clamp every tunable into its operating range.
    fn validate(&mut self) {
        let camera_name = self.camera_name.trim();
        self.camera_name = if camera_name.is_empty() {
            DEFAULT_CAMERA_NAME.to_string()
        } else {
            camera_name.to_string()
        };

        let reset = clamp_logged("NO_PERSON_RESET_SECONDS", self.reset_window.as_secs(), 5, 15);
        self.reset_window = Duration::from_secs(reset);
        let backoff = clamp_logged(
            "RECONNECT_BACKOFF_SECS",
            self.reconnect_backoff.as_secs(),
            1,
            60,
        );
        self.reconnect_backoff = Duration::from_secs(backoff);
        let timeout = clamp_logged("NOTIFY_TIMEOUT_SECS", self.telegram.timeout.as_secs(), 5, 120);
        self.telegram.timeout = Duration::from_secs(timeout);

        let d = &mut self.detection;
        let threshold = finite_or(
            "CONFIDENCE_THRESHOLD",
            d.confidence_threshold,
            DEFAULT_CONFIDENCE_THRESHOLD,
        );
        d.confidence_threshold = clamp_logged("CONFIDENCE_THRESHOLD", threshold, 0.1, 1.0);
        let min_confidence = finite_or("MIN_CONFIDENCE", d.min_confidence, DEFAULT_MIN_CONFIDENCE);
        d.min_confidence = clamp_logged("MIN_CONFIDENCE", min_confidence, 0.5, 1.0);
        d.min_box_width = clamp_logged("MIN_BOX_WIDTH", d.min_box_width, 10, 4096);
        d.min_box_height = clamp_logged("MIN_BOX_HEIGHT", d.min_box_height, 10, 4096);
        d.frame_skip = clamp_logged("FRAME_SKIP", d.frame_skip, 1, 60);
        d.max_width = clamp_logged("DETECTION_MAX_WIDTH", d.max_width, 320, 1280);
        let budget = clamp_logged("LATENCY_BUDGET_MS", d.latency_budget.as_millis() as u64, 50, 5000);
        d.latency_budget = Duration::from_millis(budget);

        self.snapshot.jpeg_quality =
            clamp_logged("JPEG_QUALITY", self.snapshot.jpeg_quality, 95, 100);
        let padding = finite_or("CROP_PADDING", self.snapshot.crop_padding, DEFAULT_CROP_PADDING);
        self.snapshot.crop_padding = clamp_logged("CROP_PADDING", padding, 0.10, 0.20);
    }

    pub fn loop_settings(&self) -> LoopSettings {
        let d = &self.detection;
        LoopSettings {
            camera: self.camera_name.clone(),
            request: DetectionRequest {
                class_ids: vec![PERSON_CLASS_ID],
                confidence_floor: d.confidence_threshold,
            },
            filter: DetectionFilter {
                target_class: PERSON_CLASS_ID,
                min_confidence: d.min_confidence,
                min_width: d.min_box_width as f32,
                min_height: d.min_box_height as f32,
            },
            reset_window: self.reset_window,
            frame_skip: d.frame_skip,
            latency_budget: d.latency_budget,
            boost_policy: d.boost_policy,
            detection_max_width: d.max_width,
            reconnect_backoff: self.reconnect_backoff,
            health_interval: HEALTH_LOG_INTERVAL,
        }
    }

    pub fn telegram_config(&self) -> TelegramConfig {
        let mut config = TelegramConfig::new(&self.telegram.token, &self.telegram.chat_id);
        config.timeout = self.telegram.timeout;
        config
    }
}

/// Notifier credentials as collected from file and environment, before the
/// presence check.
struct Credentials {
    token: Option<String>,
    chat_id: Option<String>,
}

impl Credentials {
    fn into_settings(self, timeout: Duration) -> Result<TelegramSettings> {
        let token = self
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("TELEGRAM_TOKEN (or TELEGRAM_BOT_TOKEN) is not set"))?;
        let chat_id = self
            .chat_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("TELEGRAM_CHAT_ID is not set"))?;
        Ok(TelegramSettings {
            token,
            chat_id,
            timeout,
        })
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Non-empty, trimmed value of `key`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parsed value of `key`. Unparseable values are logged and ignored.
fn env_number<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a number", key, raw);
            None
        }
    }
}

/// Like [`env_number`], but NaN and infinities count as unparseable.
fn env_float(key: &str) -> Option<f32> {
    let value: f32 = env_number(key)?;
    if value.is_finite() {
        Some(value)
    } else {
        log::warn!("ignoring {}={}: not a finite number", key, value);
        None
    }
}

/// Config files (TOML allows `nan` and `inf`) bypass [`env_float`].
fn finite_or(name: &str, value: f32, default: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        log::warn!("{}={} is not a finite number, using {}", name, value, default);
        default
    }
}

fn clamp_logged<T>(name: &str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Copy + Display,
{
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if clamped != value {
        log::warn!("{}={} out of range {}..={}, using {}", name, value, min, max, clamped);
    }
    clamped
}
