mod backend;
mod backends;
mod nms;
mod result;

use std::path::Path;

pub use backend::DetectorBackend;
pub use backends::MockBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use nms::filter_and_suppress;
pub use result::Detection;

use crate::config::{EngineType, InferenceSettings};
use crate::error::InferenceError;
use crate::frame::Frame;

/// Upper bound on detections kept per frame after NMS.
pub const MAX_DETECTIONS_PER_FRAME: usize = 100;

enum Backend {
    Mock(MockBackend),
    #[cfg(feature = "backend-tract")]
    Onnx(TractBackend),
}

impl Backend {
    fn as_dyn(&mut self) -> &mut dyn DetectorBackend {
        match self {
            Backend::Mock(b) => b,
            #[cfg(feature = "backend-tract")]
            Backend::Onnx(b) => b,
        }
    }
}

/// Object detector: a backend plus threshold filtering and per-class NMS.
pub struct InferenceEngine {
    backend: Backend,
    confidence_threshold: f32,
    nms_threshold: f32,
    failures: u64,
}

impl InferenceEngine {
    /// Build the engine for a resolved engine type. `Auto` must be resolved first.
    pub fn from_settings(
        engine: EngineType,
        settings: &InferenceSettings,
    ) -> Result<Self, InferenceError> {
        let backend = match engine {
            EngineType::Mock | EngineType::Auto => Backend::Mock(MockBackend::new()),
            EngineType::Onnx => Self::onnx_backend(settings)?,
        };
        Ok(Self {
            backend,
            confidence_threshold: settings.confidence_threshold,
            nms_threshold: settings.nms_threshold,
            failures: 0,
        })
    }

    #[cfg(feature = "backend-tract")]
    fn onnx_backend(settings: &InferenceSettings) -> Result<Backend, InferenceError> {
        let mut backend = TractBackend::new(settings.input_size);
        let path = settings
            .model_path
            .as_deref()
            .ok_or(InferenceError::NotLoaded)?;
        backend.load_model(Path::new(path))?;
        Ok(Backend::Onnx(backend))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn onnx_backend(_settings: &InferenceSettings) -> Result<Backend, InferenceError> {
        Err(InferenceError::Unsupported(
            "onnx".to_string(),
            "backend-tract",
        ))
    }

    /// Engine around a caller-supplied mock backend.
    pub fn with_mock(backend: MockBackend, confidence_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            backend: Backend::Mock(backend),
            confidence_threshold,
            nms_threshold,
            failures: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match &self.backend {
            Backend::Mock(b) => b.name(),
            #[cfg(feature = "backend-tract")]
            Backend::Onnx(b) => b.name(),
        }
    }

    pub fn load_model(&mut self, path: &Path) -> Result<(), InferenceError> {
        self.backend.as_dyn().load_model(path)
    }

    pub fn warm_up(&mut self) -> Result<(), InferenceError> {
        self.backend
            .as_dyn()
            .warm_up()
            .map_err(|e| InferenceError::Runtime(e.to_string()))
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn set_nms_threshold(&mut self, threshold: f32) {
        self.nms_threshold = threshold.clamp(0.0, 1.0);
    }

    /// Number of frames whose inference failed and yielded no detections.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Detections at or above the confidence threshold after per-class NMS.
    ///
    /// A backend failure is logged and reported as an empty frame.
    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        let threshold = self.confidence_threshold;
        let raw = match self.backend.as_dyn().infer(frame, threshold) {
            Ok(raw) => raw,
            Err(err) => {
                self.failures += 1;
                log::warn!(
                    "inference failed on frame {} ({}): {:#}",
                    frame.sequence(),
                    self.name(),
                    err
                );
                return Vec::new();
            }
        };
        let mut kept = filter_and_suppress(raw, threshold, self.nms_threshold);
        kept.truncate(MAX_DETECTIONS_PER_FRAME);
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_frame(sequence: u64) -> Frame {
        Frame::from_rgb(vec![0u8; 64 * 48 * 3], 64, 48, sequence).expect("frame")
    }

    #[test]
    fn runtime_failure_yields_zero_detections() {
        let backend = MockBackend::scripted(vec![
            Err("tensor shape mismatch".to_string()),
            Ok(vec![Detection::new(1.0, 1.0, 10.0, 10.0, 0, 0.9)]),
        ]);
        let mut engine = InferenceEngine::with_mock(backend, 0.5, 0.45);
        assert!(engine.detect(&blank_frame(0)).is_empty());
        assert_eq!(engine.failures(), 1);
        assert_eq!(engine.detect(&blank_frame(1)).len(), 1);
    }

    #[test]
    fn threshold_change_applies_to_next_frame() {
        let d = Detection::new(1.0, 1.0, 10.0, 10.0, 0, 0.6);
        let backend = MockBackend::scripted(vec![Ok(vec![d]), Ok(vec![d])]);
        let mut engine = InferenceEngine::with_mock(backend, 0.5, 0.45);
        assert_eq!(engine.detect(&blank_frame(0)).len(), 1);
        engine.set_confidence_threshold(0.7);
        assert!(engine.detect(&blank_frame(1)).is_empty());
    }

    #[test]
    fn default_mock_follows_synthetic_target() {
        let mut engine =
            InferenceEngine::from_settings(EngineType::Mock, &InferenceSettings::default())
                .expect("engine");
        let frame = Frame::from_rgb(vec![0u8; 640 * 480 * 3], 640, 480, 4).expect("frame");
        let out = engine.detect(&frame);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox(), [20.0, 190.0, 100.0, 100.0]);
        assert_eq!(engine.name(), "mock");
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn onnx_requires_feature() {
        let err = InferenceEngine::from_settings(EngineType::Onnx, &InferenceSettings::default())
            .err()
            .expect("unsupported");
        assert!(matches!(err, InferenceError::Unsupported(_, "backend-tract")));
    }
}
