//! Layered detector configuration.
//!
//! Precedence, highest first: CLI overrides, environment variables, config file,
//! built-in defaults. Layers are merged once at startup into an immutable
//! [`Config`] which is then validated before any pipeline component is built.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "DETECTOR_CONFIG";

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_STREAM_PORT: u16 = 8080;
const DEFAULT_GPIO_PIN: u32 = 17;

/// Upper bound for every `*_seconds` setting.
pub const MAX_SECONDS_SETTING: f32 = 86_400.0;

/// Hard floors and ceilings for the engagement settings.
///
/// These are not configurable: [`Config::validate`] refuses any configuration
/// that loosens them, whether or not the fire net is enabled.
pub struct SafetyLimits;

impl SafetyLimits {
    pub const FIRE_NET_MIN_CONFIDENCE_FLOOR: f32 = 0.70;
    pub const FIRE_NET_MIN_TRACK_FRAMES_FLOOR: u32 = 5;
    pub const FIRE_NET_COOLDOWN_FLOOR_SECONDS: f32 = 5.0;
    pub const FIRE_NET_MIN_DISTANCE_FLOOR_M: f32 = 2.0;
    pub const FIRE_NET_MAX_DISTANCE_CEILING_M: f32 = 200.0;
    pub const FIRE_NET_MAX_VELOCITY_CEILING_MS: f32 = 50.0;
    pub const DETECTION_CONFIDENCE_FLOOR: f32 = 0.20;
}

/// Environment prefix per config section.
const SECTION_ENV_PREFIXES: &[(&str, &str)] = &[
    ("capture", "CAPTURE_"),
    ("inference", "INFERENCE_"),
    ("drone_score", "DRONE_SCORE_"),
    ("tracker", "TRACKER_"),
    ("targeting", "TARGETING_"),
    ("alert", "ALERT_"),
    ("streaming", "STREAM_"),
    ("display", "DISPLAY_"),
    ("logging", "LOG_"),
];

/// Top-level selectors and their environment keys.
const TOP_LEVEL_ENV: &[(&str, &str)] = &[
    ("camera_type", "CAMERA_TYPE"),
    ("engine_type", "ENGINE_TYPE"),
    ("tracker_type", "TRACKER_TYPE"),
];

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CameraType {
    #[default]
    Auto,
    Picamera,
    Usb,
    Video,
    Mock,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    #[default]
    Auto,
    Onnx,
    Mock,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TrackerType {
    None,
    Centroid,
    #[default]
    Kalman,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera_type: CameraType,
    pub engine_type: EngineType,
    pub tracker_type: TrackerType,
    pub capture: CaptureSettings,
    pub inference: InferenceSettings,
    pub drone_score: DroneScoreSettings,
    pub tracker: TrackerSettings,
    pub targeting: TargetingSettings,
    pub alert: AlertSettings,
    pub streaming: StreamingSettings,
    pub display: DisplaySettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub camera_index: u32,
    pub video_path: Option<String>,
    pub video_loop: bool,
    /// Upper bound on a single blocking read.
    pub read_timeout_ms: u64,
    /// Consecutive empty reads before the pipeline reports `no_signal`.
    pub max_consecutive_misses: u32,
    /// Mock source only: end the stream after this many frames (0 = endless).
    pub mock_max_frames: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            camera_index: 0,
            video_path: None,
            video_loop: true,
            read_timeout_ms: 1_000,
            max_consecutive_misses: 30,
            mock_max_frames: 0,
        }
    }
}

impl CaptureSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub model_path: Option<String>,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub input_size: u32,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
            input_size: 320,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneScoreSettings {
    pub drone_class_id: u32,
    pub model_weight: f32,
    pub drone_threshold: f32,
    pub aspect_ratio_min: f32,
    pub aspect_ratio_max: f32,
    pub aspect_bonus: f32,
    /// Boxes with width/height below this ratio are considered tall.
    pub tall_object_ratio: f32,
    pub tall_penalty: f32,
}

impl Default for DroneScoreSettings {
    fn default() -> Self {
        Self {
            drone_class_id: 0,
            model_weight: 0.7,
            drone_threshold: 0.5,
            aspect_ratio_min: 0.8,
            aspect_ratio_max: 2.5,
            aspect_bonus: 0.15,
            tall_object_ratio: 0.6,
            tall_penalty: 0.2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub max_disappeared: u32,
    pub max_distance: f32,
    pub process_noise: f32,
    pub measurement_noise: f32,
    /// Kalman only: maximum Mahalanobis distance for a match.
    pub mahalanobis_gate: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_disappeared: 30,
            max_distance: 100.0,
            process_noise: 1.0,
            measurement_noise: 1.0,
            mahalanobis_gate: 6.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingSettings {
    pub max_targeting_distance_m: f32,
    pub assumed_drone_size_m: f32,
    pub focal_length_mm: f32,
    pub sensor_width_mm: f32,
    pub min_confidence_for_lock: f32,
    pub lock_timeout_seconds: f32,
    pub lock_min_frames: u32,
    pub tracking_lead_factor: f32,
    /// Attempt to fire automatically while a lock is held.
    pub auto_engage: bool,
    pub fire_net_enabled: bool,
    pub fire_net_min_confidence: f32,
    pub fire_net_min_track_frames: u32,
    pub fire_net_min_distance_m: f32,
    pub fire_net_max_distance_m: f32,
    pub fire_net_velocity_threshold_ms: f32,
    pub fire_net_cooldown_seconds: f32,
    pub fire_net_gpio_pin: u32,
    pub fire_net_pulse_ms: u64,
    /// Optional hash-chained JSON-lines audit log of fire attempts.
    pub fire_log_path: Option<String>,
}

impl Default for TargetingSettings {
    fn default() -> Self {
        Self {
            max_targeting_distance_m: 100.0,
            assumed_drone_size_m: 0.3,
            focal_length_mm: 3.04,
            sensor_width_mm: 3.68,
            min_confidence_for_lock: 0.7,
            lock_timeout_seconds: 5.0,
            lock_min_frames: 1,
            tracking_lead_factor: 1.2,
            auto_engage: false,
            fire_net_enabled: false,
            fire_net_min_confidence: 0.85,
            fire_net_min_track_frames: 10,
            fire_net_min_distance_m: 5.0,
            fire_net_max_distance_m: 50.0,
            fire_net_velocity_threshold_ms: 30.0,
            fire_net_cooldown_seconds: 10.0,
            fire_net_gpio_pin: DEFAULT_GPIO_PIN,
            fire_net_pulse_ms: 100,
            fire_log_path: None,
        }
    }
}

impl TargetingSettings {
    pub fn lock_timeout(&self) -> Duration {
        saturating_secs(self.lock_timeout_seconds)
    }

    pub fn fire_cooldown(&self) -> Duration {
        saturating_secs(self.fire_net_cooldown_seconds)
    }

    pub fn pulse(&self) -> Duration {
        Duration::from_millis(self.fire_net_pulse_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub console: bool,
    pub webhook_url: Option<String>,
    pub webhook_timeout_seconds: f32,
    pub webhook_retry_count: u32,
    pub webhook_queue_size: usize,
    pub file_path: Option<String>,
    pub file_buffer_size: usize,
    pub cooldown_per_track_seconds: f32,
    pub global_cooldown_seconds: f32,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            console: true,
            webhook_url: None,
            webhook_timeout_seconds: 5.0,
            webhook_retry_count: 3,
            webhook_queue_size: 32,
            file_path: None,
            file_buffer_size: 10,
            cooldown_per_track_seconds: 5.0,
            global_cooldown_seconds: 1.0,
        }
    }
}

impl AlertSettings {
    pub fn webhook_timeout(&self) -> Duration {
        saturating_secs(self.webhook_timeout_seconds)
    }

    pub fn per_track_cooldown(&self) -> Duration {
        saturating_secs(self.cooldown_per_track_seconds)
    }

    pub fn global_cooldown(&self) -> Duration {
        saturating_secs(self.global_cooldown_seconds)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub quality: u8,
    pub max_fps: u32,
    pub max_clients: usize,
    pub auth_token: Option<String>,
    /// `/health` reports 503 when the newest frame is older than this.
    pub stale_after_seconds: f32,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_STREAM_PORT,
            quality: 80,
            max_fps: 15,
            max_clients: 10,
            auth_token: None,
            stale_after_seconds: 10.0,
        }
    }
}

impl StreamingSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stale_after(&self) -> Duration {
        saturating_secs(self.stale_after_seconds)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub headless: bool,
    pub log_interval_frames: u64,
    pub show_labels: bool,
    pub show_fps: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            headless: false,
            log_interval_frames: 30,
            show_labels: true,
            show_fps: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Values supplied on the command line. `None` leaves the lower layers alone.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub camera_type: Option<CameraType>,
    pub engine_type: Option<EngineType>,
    pub tracker_type: Option<TrackerType>,
    pub video_path: Option<String>,
    pub model_path: Option<String>,
    pub confidence_threshold: Option<f32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub stream_port: Option<u16>,
    pub streaming_enabled: Option<bool>,
    pub headless: Option<bool>,
    pub webhook_url: Option<String>,
    pub log_level: Option<String>,
}

impl Config {
    /// Load the merged configuration from the process environment.
    ///
    /// `path` wins over `DETECTOR_CONFIG` when both are present.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty());
        let file = match (path, env_path.as_deref()) {
            (Some(path), _) => Some(read_config_file(path)?),
            (None, Some(path)) => Some(read_config_file(Path::new(path))?),
            (None, None) => None,
        };
        Self::from_layers(file, |key| std::env::var(key).ok(), overrides)
    }

    /// Merge `defaults <- file <- env <- overrides` and validate the result.
    pub fn from_layers<F>(
        file: Option<Value>,
        env: F,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = serde_json::to_value(Config::default()).map_err(|e| {
            ConfigError::invalid("defaults", format!("failed to encode defaults: {e}"))
        })?;
        if let Some(file) = file {
            if !file.is_null() {
                deep_merge(&mut merged, file);
            }
        }
        apply_env(&mut merged, &env)?;

        let mut cfg: Config = serde_json::from_value(merged).map_err(|e| ConfigError::Parse {
            path: "<merged>".to_string(),
            reason: e.to_string(),
        })?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: "<yaml>".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_layers(Some(value), |_| None, &ConfigOverrides::default())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::invalid("config", e.to_string()))
    }

    fn apply_overrides(&mut self, o: &ConfigOverrides) {
        if let Some(v) = o.camera_type {
            self.camera_type = v;
        }
        if let Some(v) = o.engine_type {
            self.engine_type = v;
        }
        if let Some(v) = o.tracker_type {
            self.tracker_type = v;
        }
        if let Some(v) = &o.video_path {
            self.capture.video_path = Some(v.clone());
        }
        if let Some(v) = &o.model_path {
            self.inference.model_path = Some(v.clone());
        }
        if let Some(v) = o.confidence_threshold {
            self.inference.confidence_threshold = v;
        }
        if let Some(v) = o.width {
            self.capture.width = v;
        }
        if let Some(v) = o.height {
            self.capture.height = v;
        }
        if let Some(v) = o.fps {
            self.capture.fps = v;
        }
        if let Some(v) = o.stream_port {
            self.streaming.port = v;
        }
        if let Some(v) = o.streaming_enabled {
            self.streaming.enabled = v;
        }
        if let Some(v) = o.headless {
            self.display.headless = v;
        }
        if let Some(v) = &o.webhook_url {
            self.alert.webhook_url = Some(v.clone());
        }
        if let Some(v) = &o.log_level {
            self.logging.level = v.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.capture;
        if c.width == 0 || c.height == 0 {
            return Err(ConfigError::invalid("capture.width/height", "must be non-zero"));
        }
        if c.fps == 0 || c.fps > 240 {
            return Err(ConfigError::invalid("capture.fps", "must be in 1..=240"));
        }
        if c.read_timeout_ms == 0 {
            return Err(ConfigError::invalid("capture.read_timeout_ms", "must be non-zero"));
        }
        if c.max_consecutive_misses == 0 {
            return Err(ConfigError::invalid(
                "capture.max_consecutive_misses",
                "must be non-zero",
            ));
        }
        if self.camera_type == CameraType::Video && c.video_path.is_none() {
            return Err(ConfigError::invalid(
                "capture.video_path",
                "required when camera_type is 'video'",
            ));
        }

        let i = &self.inference;
        unit_interval("inference.confidence_threshold", i.confidence_threshold)?;
        if i.confidence_threshold < SafetyLimits::DETECTION_CONFIDENCE_FLOOR {
            return Err(ConfigError::invalid(
                "inference.confidence_threshold",
                format!(
                    "{} is below the detection floor {}",
                    i.confidence_threshold,
                    SafetyLimits::DETECTION_CONFIDENCE_FLOOR
                ),
            ));
        }
        unit_interval("inference.nms_threshold", i.nms_threshold)?;
        if i.input_size == 0 || i.input_size % 32 != 0 {
            return Err(ConfigError::invalid(
                "inference.input_size",
                "must be a non-zero multiple of 32",
            ));
        }
        if self.engine_type == EngineType::Onnx && i.model_path.is_none() {
            return Err(ConfigError::invalid(
                "inference.model_path",
                "required when engine_type is 'onnx'",
            ));
        }

        let d = &self.drone_score;
        unit_interval("drone_score.model_weight", d.model_weight)?;
        unit_interval("drone_score.drone_threshold", d.drone_threshold)?;
        unit_interval("drone_score.aspect_bonus", d.aspect_bonus)?;
        unit_interval("drone_score.tall_penalty", d.tall_penalty)?;
        if !(d.aspect_ratio_min > 0.0 && d.aspect_ratio_min < d.aspect_ratio_max) {
            return Err(ConfigError::invalid(
                "drone_score.aspect_ratio_min",
                "must be positive and below aspect_ratio_max",
            ));
        }

        let t = &self.tracker;
        if t.max_distance <= 0.0 {
            return Err(ConfigError::invalid("tracker.max_distance", "must be positive"));
        }
        if t.process_noise <= 0.0 || t.measurement_noise <= 0.0 {
            return Err(ConfigError::invalid(
                "tracker.process_noise/measurement_noise",
                "must be positive",
            ));
        }
        if t.mahalanobis_gate <= 0.0 {
            return Err(ConfigError::invalid("tracker.mahalanobis_gate", "must be positive"));
        }

        self.validate_targeting()?;

        let a = &self.alert;
        if let Some(raw) = &a.webhook_url {
            let parsed = url::Url::parse(raw)
                .map_err(|e| ConfigError::invalid("alert.webhook_url", e.to_string()))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ConfigError::invalid(
                    "alert.webhook_url",
                    "scheme must be http or https",
                ));
            }
        }
        seconds_setting("alert.webhook_timeout_seconds", a.webhook_timeout_seconds)?;
        if a.webhook_timeout_seconds == 0.0 {
            return Err(ConfigError::invalid(
                "alert.webhook_timeout_seconds",
                "must be positive",
            ));
        }
        if a.webhook_retry_count > 10 {
            return Err(ConfigError::invalid("alert.webhook_retry_count", "must be <= 10"));
        }
        if a.webhook_queue_size == 0 {
            return Err(ConfigError::invalid("alert.webhook_queue_size", "must be non-zero"));
        }
        seconds_setting("alert.cooldown_per_track_seconds", a.cooldown_per_track_seconds)?;
        seconds_setting("alert.global_cooldown_seconds", a.global_cooldown_seconds)?;

        let s = &self.streaming;
        if s.quality == 0 || s.quality > 100 {
            return Err(ConfigError::invalid("streaming.quality", "must be in 1..=100"));
        }
        if s.max_fps == 0 {
            return Err(ConfigError::invalid("streaming.max_fps", "must be non-zero"));
        }
        if s.max_clients == 0 {
            return Err(ConfigError::invalid("streaming.max_clients", "must be non-zero"));
        }
        if s.host.trim().is_empty() {
            return Err(ConfigError::invalid("streaming.host", "must not be empty"));
        }
        seconds_setting("streaming.stale_after_seconds", s.stale_after_seconds)?;

        if self.display.log_interval_frames == 0 {
            return Err(ConfigError::invalid(
                "display.log_interval_frames",
                "must be non-zero",
            ));
        }
        Ok(())
    }

    fn validate_targeting(&self) -> Result<(), ConfigError> {
        let t = &self.targeting;
        positive("targeting.assumed_drone_size_m", t.assumed_drone_size_m)?;
        positive("targeting.focal_length_mm", t.focal_length_mm)?;
        positive("targeting.sensor_width_mm", t.sensor_width_mm)?;
        positive("targeting.max_targeting_distance_m", t.max_targeting_distance_m)?;
        unit_interval("targeting.min_confidence_for_lock", t.min_confidence_for_lock)?;
        unit_interval("targeting.fire_net_min_confidence", t.fire_net_min_confidence)?;
        seconds_setting("targeting.lock_timeout_seconds", t.lock_timeout_seconds)?;
        if t.lock_timeout_seconds == 0.0 {
            return Err(ConfigError::invalid(
                "targeting.lock_timeout_seconds",
                "must be positive",
            ));
        }
        seconds_setting("targeting.fire_net_cooldown_seconds", t.fire_net_cooldown_seconds)?;
        if !(t.fire_net_min_distance_m.is_finite() && t.fire_net_max_distance_m.is_finite())
            || t.fire_net_min_distance_m >= t.fire_net_max_distance_m
        {
            return Err(ConfigError::invalid(
                "targeting.fire_net_min_distance_m",
                "must be finite and below fire_net_max_distance_m",
            ));
        }
        positive(
            "targeting.fire_net_velocity_threshold_ms",
            t.fire_net_velocity_threshold_ms,
        )?;
        self.validate_safety_limits()?;
        if !(2..=27).contains(&t.fire_net_gpio_pin) {
            return Err(ConfigError::invalid(
                "targeting.fire_net_gpio_pin",
                "must be a BCM pin in 2..=27",
            ));
        }
        if t.fire_net_pulse_ms == 0 || t.fire_net_pulse_ms > 1_000 {
            return Err(ConfigError::invalid(
                "targeting.fire_net_pulse_ms",
                "must be in 1..=1000",
            ));
        }
        Ok(())
    }

    fn validate_safety_limits(&self) -> Result<(), ConfigError> {
        let t = &self.targeting;
        if t.fire_net_min_confidence < SafetyLimits::FIRE_NET_MIN_CONFIDENCE_FLOOR {
            return Err(below_floor(
                "targeting.fire_net_min_confidence",
                t.fire_net_min_confidence,
                SafetyLimits::FIRE_NET_MIN_CONFIDENCE_FLOOR,
            ));
        }
        if t.fire_net_min_confidence < t.min_confidence_for_lock {
            return Err(ConfigError::invalid(
                "targeting.fire_net_min_confidence",
                format!(
                    "{} must not be below min_confidence_for_lock {}",
                    t.fire_net_min_confidence, t.min_confidence_for_lock
                ),
            ));
        }
        if t.fire_net_min_track_frames < SafetyLimits::FIRE_NET_MIN_TRACK_FRAMES_FLOOR {
            return Err(below_floor(
                "targeting.fire_net_min_track_frames",
                t.fire_net_min_track_frames,
                SafetyLimits::FIRE_NET_MIN_TRACK_FRAMES_FLOOR,
            ));
        }
        if t.fire_net_cooldown_seconds < SafetyLimits::FIRE_NET_COOLDOWN_FLOOR_SECONDS {
            return Err(below_floor(
                "targeting.fire_net_cooldown_seconds",
                t.fire_net_cooldown_seconds,
                SafetyLimits::FIRE_NET_COOLDOWN_FLOOR_SECONDS,
            ));
        }
        if t.fire_net_min_distance_m < SafetyLimits::FIRE_NET_MIN_DISTANCE_FLOOR_M {
            return Err(below_floor(
                "targeting.fire_net_min_distance_m",
                t.fire_net_min_distance_m,
                SafetyLimits::FIRE_NET_MIN_DISTANCE_FLOOR_M,
            ));
        }
        if t.fire_net_max_distance_m > SafetyLimits::FIRE_NET_MAX_DISTANCE_CEILING_M {
            return Err(ConfigError::invalid(
                "targeting.fire_net_max_distance_m",
                format!(
                    "{} exceeds the safety ceiling {}",
                    t.fire_net_max_distance_m,
                    SafetyLimits::FIRE_NET_MAX_DISTANCE_CEILING_M
                ),
            ));
        }
        if t.fire_net_velocity_threshold_ms > SafetyLimits::FIRE_NET_MAX_VELOCITY_CEILING_MS {
            return Err(ConfigError::invalid(
                "targeting.fire_net_velocity_threshold_ms",
                format!(
                    "{} exceeds the safety ceiling {}",
                    t.fire_net_velocity_threshold_ms,
                    SafetyLimits::FIRE_NET_MAX_VELOCITY_CEILING_MS
                ),
            ));
        }
        Ok(())
    }
}

fn below_floor(
    field: &str,
    value: impl std::fmt::Display,
    floor: impl std::fmt::Display,
) -> ConfigError {
    ConfigError::invalid(field, format!("{value} is below the safety floor {floor}"))
}

/// Seconds setting as a `Duration`, clamped to `0..=MAX_SECONDS_SETTING`.
/// NaN maps to the upper bound.
fn saturating_secs(value: f32) -> Duration {
    let clamped = if value.is_nan() {
        MAX_SECONDS_SETTING
    } else {
        value.clamp(0.0, MAX_SECONDS_SETTING)
    };
    Duration::from_secs_f32(clamped)
}

fn seconds_setting(field: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=MAX_SECONDS_SETTING).contains(&value)
        && Duration::try_from_secs_f32(value).is_ok()
    {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("{value} is outside 0..={MAX_SECONDS_SETTING} seconds"),
        ))
    }
}

fn positive(field: &str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} must be positive and finite")))
    }
}

fn unit_interval(field: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")))
    }
}

/// Parse a config file. The format follows the extension; anything that is
/// not `.json` or `.toml` is read as YAML.
pub fn read_config_file(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let parse_err = |reason: String| ConfigError::Parse {
        path: path.display().to_string(),
        reason,
    };
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("json") => serde_json::from_str(&raw).map_err(|e| parse_err(e.to_string())),
        Some("toml") => {
            let value: toml::Value = toml::from_str(&raw).map_err(|e| parse_err(e.to_string()))?;
            serde_json::to_value(value).map_err(|e| parse_err(e.to_string()))
        }
        _ => serde_yaml::from_str(&raw).map_err(|e| parse_err(e.to_string())),
    }
}

fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env<F>(merged: &mut Value, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Value::Object(root) = merged else {
        return Err(ConfigError::invalid("config", "root must be a mapping"));
    };
    for (field, key) in TOP_LEVEL_ENV {
        if let Some(raw) = env(key).filter(|v| !v.trim().is_empty()) {
            root.insert(
                (*field).to_string(),
                Value::String(raw.trim().to_ascii_lowercase()),
            );
        }
    }
    for (section, prefix) in SECTION_ENV_PREFIXES {
        let Some(Value::Object(fields)) = root.get_mut(*section) else {
            continue;
        };
        overlay_section(fields, prefix, env)?;
    }
    Ok(())
}

fn overlay_section<F>(fields: &mut Map<String, Value>, prefix: &str, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for (name, slot) in fields.iter_mut() {
        let key = format!("{}{}", prefix, name.to_ascii_uppercase());
        let Some(raw) = env(&key) else {
            continue;
        };
        // Strings and optional strings take the raw value verbatim.
        if matches!(slot, Value::String(_) | Value::Null) {
            *slot = Value::String(raw);
            continue;
        }
        let parsed: Value = serde_yaml::from_str(raw.trim()).map_err(|e| ConfigError::Env {
            key: key.clone(),
            value: raw.clone(),
            reason: e.to_string(),
        })?;
        if std::mem::discriminant(&parsed) != std::mem::discriminant(&*slot) {
            return Err(ConfigError::Env {
                key,
                value: raw,
                reason: "type does not match setting".to_string(),
            });
        }
        *slot = parsed;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
