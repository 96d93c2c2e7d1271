use porter_core::crop::DEFAULT_CROP_MARGIN;
use porter_core::still::DEFAULT_JPEG_QUALITY;
use porter_core::whitelist::DEFAULT_THUMBNAIL_WIDTH;
use porter_core::FaceApiConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration: TOML file, then `PORTER_*` environment, then defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `auto`, `synthetic`, or a V4L2 device path.
    pub camera_device: String,
    /// Substring matched against device names during auto-discovery.
    pub preferred_camera: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Parent of the visitor whitelist folder.
    pub data_dir: PathBuf,
    pub frame_interval_ms: u64,
    pub crop_margin: u32,
    pub jpeg_quality: u8,
    pub thumbnail_width: u32,
    /// SCRFD score threshold.
    pub detection_threshold: f32,
    /// When false the camera still serves stills but no overlay loop runs.
    pub live_feed_enabled: bool,
    pub bus: BusKind,
    pub face_api_endpoint: Option<String>,
    pub face_api_key: Option<String>,
    pub person_group: String,
    pub recognition_timeout_secs: u64,
    /// Minimum identify confidence reported as a match.
    pub match_confidence: f32,
}

/// On-disk form; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    preferred_camera: Option<String>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    model_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    frame_interval_ms: Option<u64>,
    crop_margin: Option<u32>,
    jpeg_quality: Option<u8>,
    thumbnail_width: Option<u32>,
    detection_threshold: Option<f32>,
    live_feed_enabled: Option<bool>,
    bus: Option<BusKind>,
    face_api_endpoint: Option<String>,
    face_api_key: Option<String>,
    person_group: Option<String>,
    recognition_timeout_secs: Option<u64>,
    match_confidence: Option<f32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "auto".to_string(),
            preferred_camera: "LifeCam".to_string(),
            capture_width: 640,
            capture_height: 480,
            model_dir: porter_core::default_model_dir(),
            data_dir: porter_core::default_data_dir(),
            frame_interval_ms: 66,
            crop_margin: DEFAULT_CROP_MARGIN,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            thumbnail_width: DEFAULT_THUMBNAIL_WIDTH,
            detection_threshold: porter_core::scrfd::DEFAULT_CONFIDENCE_THRESHOLD,
            live_feed_enabled: true,
            bus: BusKind::Session,
            face_api_endpoint: None,
            face_api_key: None,
            person_group: "whitelist".to_string(),
            recognition_timeout_secs: 10,
            match_confidence: 0.5,
        }
    }
}

impl Config {
    /// Load from `$PORTER_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("PORTER_CONFIG") {
            Some(path) => Some(read_file(Path::new(&path))?),
            None => None,
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: Option<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Self {
        let file = file.unwrap_or_default();
        let d = Config::default();

        let string = |key: &str, from_file: Option<String>, default: String| {
            env(key).or(from_file).unwrap_or(default)
        };
        let optional = |key: &str, from_file: Option<String>| {
            env(key).or(from_file).filter(|v| !v.trim().is_empty())
        };

        Self {
            camera_device: string("PORTER_CAMERA_DEVICE", file.camera_device, d.camera_device),
            preferred_camera: string("PORTER_PREFERRED_CAMERA", file.preferred_camera, d.preferred_camera),
            capture_width: parsed(&env, "PORTER_CAPTURE_WIDTH", file.capture_width, d.capture_width),
            capture_height: parsed(&env, "PORTER_CAPTURE_HEIGHT", file.capture_height, d.capture_height),
            model_dir: env("PORTER_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or(d.model_dir),
            data_dir: env("PORTER_DATA_DIR")
                .map(PathBuf::from)
                .or(file.data_dir)
                .unwrap_or(d.data_dir),
            frame_interval_ms: parsed(&env, "PORTER_FRAME_INTERVAL_MS", file.frame_interval_ms, d.frame_interval_ms)
                .max(1),
            crop_margin: parsed(&env, "PORTER_CROP_MARGIN", file.crop_margin, d.crop_margin),
            jpeg_quality: parsed(&env, "PORTER_JPEG_QUALITY", file.jpeg_quality, d.jpeg_quality).clamp(1, 100),
            thumbnail_width: parsed(&env, "PORTER_THUMBNAIL_WIDTH", file.thumbnail_width, d.thumbnail_width),
            detection_threshold: parsed(
                &env,
                "PORTER_DETECTION_THRESHOLD",
                file.detection_threshold,
                d.detection_threshold,
            ),
            live_feed_enabled: env("PORTER_LIVE_FEED_ENABLED")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .or(file.live_feed_enabled)
                .unwrap_or(d.live_feed_enabled),
            bus: match env("PORTER_BUS").as_deref() {
                Some("system") => BusKind::System,
                Some("session") => BusKind::Session,
                _ => file.bus.unwrap_or(d.bus),
            },
            face_api_endpoint: optional("PORTER_FACE_API_ENDPOINT", file.face_api_endpoint),
            face_api_key: optional("PORTER_FACE_API_KEY", file.face_api_key),
            person_group: string("PORTER_PERSON_GROUP", file.person_group, d.person_group),
            recognition_timeout_secs: parsed(
                &env,
                "PORTER_RECOGNITION_TIMEOUT_SECS",
                file.recognition_timeout_secs,
                d.recognition_timeout_secs,
            ),
            match_confidence: parsed(&env, "PORTER_MATCH_CONFIDENCE", file.match_confidence, d.match_confidence),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(porter_core::SCRFD_MODEL_FILE)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Face API settings, or `None` when endpoint or key is missing.
    pub fn face_api(&self) -> Option<FaceApiConfig> {
        Some(FaceApiConfig {
            endpoint: self.face_api_endpoint.clone()?,
            subscription_key: self.face_api_key.clone()?,
            person_group: self.person_group.clone(),
            match_confidence: self.match_confidence,
            timeout: Duration::from_secs(self.recognition_timeout_secs),
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Environment value if it parses, else the file value, else the default.
fn parsed<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    from_file: Option<T>,
    default: T,
) -> T {
    env(key)
        .and_then(|v| match v.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(key, value = %v, "ignoring unparseable environment value");
                None
            }
        })
        .or(from_file)
        .unwrap_or(default)
}
