//! Live frame hand-off and the MJPEG server.
//!
//! The pipeline publishes each rendered frame into a [`FrameSlot`] and keeps a
//! [`StatusBoard`] current. Streaming clients only ever read from these two;
//! nothing flows back into the pipeline. `/metrics` renders the same status
//! board in the Prometheus text format.

pub mod metrics;
pub mod server;
pub mod slot;

use image::RgbImage;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

pub use server::{StreamHandle, StreamingServer};
pub use slot::{LatestSlot, SlotRead};

use crate::targeting::LockState;

/// A rendered frame as served to clients.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub image: Arc<RgbImage>,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub published_at: Instant,
}

impl PublishedFrame {
    pub fn new(image: RgbImage, sequence: u64, timestamp_ms: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            timestamp_ms,
            published_at: Instant::now(),
        }
    }
}

pub type FrameSlot = LatestSlot<PublishedFrame>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Starting,
    Running,
    NoSignal,
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::NoSignal => "no_signal",
            Self::Stopped => "stopped",
        }
    }
}

/// Pipeline summary served by `/status`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub status: PipelineState,
    pub active_tracks: usize,
    pub drones: usize,
    pub fps: f32,
    pub armed: bool,
    /// Wall-clock time of the last pulse attempt, ms since the Unix epoch.
    pub last_fire_ts: Option<u64>,
    pub lock: LockState,
    pub lock_track_id: Option<u64>,
    pub target_distance_m: Option<f32>,
    pub frames_processed: u64,
    pub last_frame_sequence: Option<u64>,
    pub source: String,
    pub engine: String,
    pub tracker: String,
    pub alerts_sent: u64,
    pub alerts_suppressed: u64,
    pub alerts_failed: u64,
    pub detections_total: u64,
    pub drone_detections_total: u64,
    pub inference_failures: u64,
    /// Frames read by the capture thread, including ones the pipeline skipped.
    pub capture_frames: u64,
    pub capture_misses: u64,
    pub fire_attempts: u64,
    pub shots_fired: u64,
    pub fire_log_write_failures: u64,
    /// The fire log can no longer be extended; attempts are kept in memory only.
    pub fire_log_degraded: bool,
}

/// Latest [`PipelineStatus`], written by the pipeline and read by clients.
#[derive(Default)]
pub struct StatusBoard {
    inner: Mutex<PipelineStatus>,
}

impl StatusBoard {
    pub fn new(initial: PipelineStatus) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, apply: impl FnOnce(&mut PipelineStatus)) {
        apply(&mut self.lock());
    }

    pub fn snapshot(&self) -> PipelineStatus {
        self.lock().clone()
    }

    pub fn state(&self) -> PipelineState {
        self.lock().status
    }
}
