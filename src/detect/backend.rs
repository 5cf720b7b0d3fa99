use anyhow::Result;
use std::path::Path;

use crate::detect::result::Detection;
use crate::error::InferenceError;
use crate::frame::Frame;

/// Object-detection backend.
///
/// Backends hold no process-wide state: everything they need lives in `self`,
/// so a single inference thread can own one without external locking.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Load model weights. A failure here is fatal at startup.
    fn load_model(&mut self, path: &Path) -> Result<(), InferenceError>;

    /// Raw detections in frame pixel space.
    ///
    /// `min_confidence` is a hint for pre-filtering; the engine applies the
    /// authoritative threshold and NMS afterwards.
    fn infer(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
