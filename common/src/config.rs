use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    pub rustfs: Option<RustfsConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_id")]
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// multipart/x-mixed-replace stream, one JPEG per part.
    Mjpeg,
    /// Periodic GET of a single-frame endpoint.
    Polling,
    /// JPEG files in a directory, replayed in name order.
    Directory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_mode")]
    pub mode: SourceMode,
    #[serde(default)]
    pub url: String,
    pub directory: Option<PathBuf>,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    Http,
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default = "default_estimator_kind")]
    pub kind: EstimatorKind,
    #[serde(default = "default_estimator_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// No timeout when unset: a hung inference server stalls the pipeline.
    pub request_timeout_secs: Option<u64>,
    pub replay_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Capture whenever an elbow is bent inside the angle window. Repeats.
    ArmAngle,
    /// Capture once when all body parts are visible, then stop detecting.
    FullBody,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::ArmAngle => "arm_angle",
            TriggerMode::FullBody => "full_body",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_trigger_mode")]
    pub mode: TriggerMode,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_angle_min_deg")]
    pub angle_min_deg: f64,
    #[serde(default = "default_angle_max_deg")]
    pub angle_max_deg: f64,
    /// Minimum gap between two arm-angle captures. 0 captures on every qualifying frame.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_keypoint_radius")]
    pub keypoint_radius: i32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureBackend {
    Local,
    Rustfs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_backend")]
    pub backend: CaptureBackend,
    #[serde(default = "default_capture_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_capture_prefix")]
    pub prefix: String,
    /// Newest N captures are kept; 0 keeps everything.
    #[serde(default = "default_retain")]
    pub retain: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RustfsConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_rustfs_bucket")]
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_rustfs_public_url")]
    pub rustfs_public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: default_camera_id(),
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            kind: default_estimator_kind(),
            url: default_estimator_url(),
            model: default_model(),
            request_timeout_secs: None,
            replay_path: None,
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mode: default_trigger_mode(),
            min_confidence: default_min_confidence(),
            angle_min_deg: default_angle_min_deg(),
            angle_max_deg: default_angle_max_deg(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: default_min_confidence(),
            keypoint_radius: default_keypoint_radius(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: default_capture_backend(),
            dir: default_capture_dir(),
            prefix: default_capture_prefix(),
            retain: default_retain(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: default_control_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            rustfs_public_url: default_rustfs_public_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("trigger.min_confidence", self.trigger.min_confidence),
            ("render.min_confidence", self.render.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        let t = &self.trigger;
        if !(t.angle_min_deg >= 0.0 && t.angle_min_deg < t.angle_max_deg && t.angle_max_deg <= 180.0)
        {
            return Err(ConfigError::Invalid(format!(
                "angle window ({}, {}) must satisfy 0 <= min < max <= 180",
                t.angle_min_deg, t.angle_max_deg
            )));
        }

        if !(self.source.fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "source.fps must be positive, got {}",
                self.source.fps
            )));
        }

        match self.source.mode {
            SourceMode::Mjpeg | SourceMode::Polling if self.source.url.is_empty() => {
                return Err(ConfigError::Invalid(
                    "source.url is required for mjpeg and polling modes".into(),
                ));
            }
            SourceMode::Directory if self.source.directory.is_none() => {
                return Err(ConfigError::Invalid(
                    "source.directory is required for directory mode".into(),
                ));
            }
            _ => {}
        }

        if self.estimator.kind == EstimatorKind::Replay && self.estimator.replay_path.is_none() {
            return Err(ConfigError::Invalid(
                "estimator.replay_path is required for the replay estimator".into(),
            ));
        }

        if self.capture.backend == CaptureBackend::Rustfs && self.rustfs.is_none() {
            return Err(ConfigError::Invalid(
                "capture.backend = \"rustfs\" needs a [rustfs] section".into(),
            ));
        }

        Ok(())
    }

    /// Bucket captures live in, when stored in RustFS.
    pub fn rustfs_bucket(&self) -> String {
        self.rustfs
            .as_ref()
            .map(|r| r.bucket.clone())
            .unwrap_or_else(default_rustfs_bucket)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_camera_id() -> String {
    "webcam-0".into()
}
fn default_source_mode() -> SourceMode {
    SourceMode::Mjpeg
}
fn default_quality() -> u32 {
    80
}
fn default_fps() -> f64 {
    15.0
}
fn default_estimator_kind() -> EstimatorKind {
    EstimatorKind::Http
}
fn default_estimator_url() -> String {
    "http://127.0.0.1:9000/estimate".into()
}
fn default_model() -> String {
    "movenet_singlepose_lightning".into()
}
fn default_trigger_mode() -> TriggerMode {
    TriggerMode::ArmAngle
}
fn default_min_confidence() -> f32 {
    0.6
}
fn default_angle_min_deg() -> f64 {
    45.0
}
fn default_angle_max_deg() -> f64 {
    90.0
}
fn default_debounce_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_keypoint_radius() -> i32 {
    5
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_capture_backend() -> CaptureBackend {
    CaptureBackend::Local
}
fn default_capture_dir() -> PathBuf {
    PathBuf::from("captures")
}
fn default_capture_prefix() -> String {
    "captures/".into()
}
fn default_retain() -> usize {
    100
}
fn default_rustfs_bucket() -> String {
    "pose-captures".into()
}
fn default_database_path() -> String {
    "data".into()
}
fn default_control_port() -> u16 {
    8090
}
fn default_api_port() -> u16 {
    8091
}
fn default_rustfs_public_url() -> String {
    "http://localhost:9000".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [source]
        url = "http://camera.local:8080/stream"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.camera.id, "webcam-0");
        assert_eq!(config.source.mode, SourceMode::Mjpeg);
        assert_eq!(config.estimator.kind, EstimatorKind::Http);
        assert!(config.estimator.request_timeout_secs.is_none());
        assert_eq!(config.trigger.mode, TriggerMode::ArmAngle);
        assert_eq!(config.trigger.min_confidence, 0.6);
        assert_eq!(config.trigger.angle_min_deg, 45.0);
        assert_eq!(config.trigger.angle_max_deg, 90.0);
        assert_eq!(config.capture.backend, CaptureBackend::Local);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rustfs_bucket(), "pose-captures");
    }

    #[test]
    fn full_body_mode_parses() {
        let config = Config::from_toml(
            r#"
            [source]
            mode = "directory"
            directory = "fixtures/frames"
            fps = 5.0

            [trigger]
            mode = "full_body"
            debounce_ms = 0
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.trigger.mode, TriggerMode::FullBody);
        assert_eq!(config.trigger.debounce_ms, 0);
        assert_eq!(config.source.directory, Some(PathBuf::from("fixtures/frames")));
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let err = Config::from_toml(
            r#"
            [source]
            url = "http://x"
            [trigger]
            mode = "jumping_jack"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.trigger.min_confidence = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_inverted_angle_window() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.trigger.angle_min_deg = 90.0;
        config.trigger.angle_max_deg = 45.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_missing_url_and_directory() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.source.url.clear();
        assert!(config.validate().is_err());

        config.source.mode = SourceMode::Directory;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rustfs_backend_needs_section() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.capture.backend = CaptureBackend::Rustfs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sample_config_is_valid() {
        let config = Config::from_toml(include_str!("../../config.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.trigger.mode.as_str(), "arm_angle");
        assert_eq!(config.control.port, 8090);
        assert!(config.rustfs.is_none());
    }
}
