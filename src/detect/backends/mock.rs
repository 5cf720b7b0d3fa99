use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::InferenceError;
use crate::frame::Frame;
use crate::ingest::mock_target_box;

const MOCK_CONFIDENCE: f32 = 0.85;

/// Deterministic backend for tests and hardware-free runs.
///
/// By default it reports the synthetic target drawn by the mock frame source.
/// A scripted backend replays a fixed sequence of per-frame outcomes instead,
/// including injected failures, and reports nothing once the script runs out.
pub struct MockBackend {
    script: Option<VecDeque<Result<Vec<Detection>, String>>>,
    calls: u64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            script: None,
            calls: 0,
        }
    }

    pub fn scripted<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Result<Vec<Detection>, String>>,
    {
        Self {
            script: Some(frames.into_iter().collect()),
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn load_model(&mut self, path: &Path) -> Result<(), InferenceError> {
        log::info!("MockBackend: ignoring model {}", path.display());
        Ok(())
    }

    fn infer(&mut self, frame: &Frame, _min_confidence: f32) -> Result<Vec<Detection>> {
        self.calls += 1;
        if let Some(script) = self.script.as_mut() {
            return match script.pop_front() {
                Some(Ok(detections)) => Ok(detections),
                Some(Err(reason)) => Err(anyhow!(reason)),
                None => Ok(Vec::new()),
            };
        }
        let (x, y, w, h) = mock_target_box(frame.sequence(), frame.width(), frame.height());
        Ok(vec![Detection::new(x, y, w, h, 0, MOCK_CONFIDENCE)])
    }
}
