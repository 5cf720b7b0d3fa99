//! Error taxonomy for the detector.
//!
//! Startup paths surface these through `anyhow` and exit. Per-frame paths log
//! them and keep running. An interlock rejection is not an error; see
//! `targeting::RejectReason`.

use thiserror::Error;

/// Camera or video acquisition failures.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("frame source '{source_name}' failed to open: {reason}")]
    Open { source_name: String, reason: String },

    #[error("frame source '{0}' is not available in this build (enable feature '{1}')")]
    Unsupported(String, &'static str),

    #[error("frame source read failed: {0}")]
    Read(String),

    #[error("frame buffer of {actual} bytes does not match {width}x{height} RGB")]
    BadBuffer { width: u32, height: u32, actual: usize },
}

/// Model loading and inference failures.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model load failed for {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("inference engine '{0}' is not available in this build (enable feature '{1}')")]
    Unsupported(String, &'static str),

    #[error("no model loaded")]
    NotLoaded,

    #[error("inference failed: {0}")]
    Runtime(String),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("environment variable {key} has invalid value '{value}': {reason}")]
    Env {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Alert delivery failures.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert sink '{sink}' failed: {reason}")]
    Delivery { sink: String, reason: String },

    #[error("alert queue full, dropped alert for track {0}")]
    QueueFull(u64),

    #[error("{} alert sink(s) failed: {}", .0.len(), .0.join("; "))]
    Composite(Vec<String>),

    #[error("alert io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("alert encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures isolated to a single streaming client connection.
#[derive(Debug, Error)]
pub enum StreamingClientError {
    #[error("client io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request: {0}")]
    BadRequest(&'static str),

    #[error("request too large")]
    TooLarge,

    #[error("jpeg encoding failed: {0}")]
    Encode(String),
}

/// Failures driving the actuator output.
#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("gpio pin {pin}: {reason}")]
    Gpio { pin: u32, reason: String },

    #[error("actuator io error: {0}")]
    Io(#[from] std::io::Error),
}
