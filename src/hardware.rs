//! Startup capability probe.
//!
//! Resolves `auto` camera and engine selections into concrete variants based
//! on what the host exposes and what this build was compiled with.

use std::path::{Path, PathBuf};

use crate::config::{CameraType, Config, EngineType};

#[derive(Clone, Debug, Default)]
pub struct HardwareProbe {
    pub board_model: Option<String>,
    pub video_devices: Vec<PathBuf>,
}

impl HardwareProbe {
    pub fn detect() -> Self {
        let board_model = std::fs::read_to_string("/proc/device-tree/model")
            .ok()
            .map(|m| m.trim_end_matches('\0').trim().to_string())
            .filter(|m| !m.is_empty());
        let mut video_devices: Vec<PathBuf> = std::fs::read_dir("/dev")
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| is_video_node(path))
                    .collect()
            })
            .unwrap_or_default();
        video_devices.sort();
        Self {
            board_model,
            video_devices,
        }
    }

    pub fn is_raspberry_pi(&self) -> bool {
        self.board_model
            .as_deref()
            .is_some_and(|m| m.contains("Raspberry Pi"))
    }

    pub fn has_camera(&self, index: u32) -> bool {
        let wanted = PathBuf::from(format!("/dev/video{index}"));
        self.video_devices.iter().any(|p| *p == wanted)
    }

    /// Concrete camera type for this host.
    pub fn resolve_camera(&self, cfg: &Config) -> CameraType {
        if cfg.camera_type != CameraType::Auto {
            return cfg.camera_type;
        }
        if cfg.capture.video_path.is_some() {
            return CameraType::Video;
        }
        if cfg!(feature = "ingest-v4l2") && self.has_camera(cfg.capture.camera_index) {
            return if self.is_raspberry_pi() {
                CameraType::Picamera
            } else {
                CameraType::Usb
            };
        }
        log::warn!("no camera detected; falling back to the mock frame source");
        CameraType::Mock
    }

    /// Concrete inference engine for this build and configuration.
    pub fn resolve_engine(&self, cfg: &Config) -> EngineType {
        if cfg.engine_type != EngineType::Auto {
            return cfg.engine_type;
        }
        let model_present = cfg
            .inference
            .model_path
            .as_deref()
            .is_some_and(|p| Path::new(p).is_file());
        if cfg!(feature = "backend-tract") && model_present {
            EngineType::Onnx
        } else {
            log::warn!("no usable model; falling back to the mock inference engine");
            EngineType::Mock
        }
    }
}

fn is_video_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("video"))
        .is_some_and(|idx| !idx.is_empty() && idx.chars().all(|c| c.is_ascii_digit()))
}
