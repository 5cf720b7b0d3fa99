//! Multi-object tracking.
//!
//! Trackers assign stable ids to scored detections across frames. Ids are
//! monotonic and a deleted track's id is never handed out again until the
//! tracker is explicitly reset.

mod assign;
mod centroid;
mod kalman;

use serde::Serialize;

pub use centroid::CentroidTracker;
pub use kalman::KalmanTracker;

use crate::config::{TrackerSettings, TrackerType};
use crate::score::ScoredDetection;

/// Per-track lifecycle. Deleted tracks are dropped from the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    New,
    Matched,
    Lost,
}

/// Snapshot of a live track after a tracker update.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TrackedObject {
    pub track_id: u64,
    /// Most recent matched detection.
    pub detection: ScoredDetection,
    pub state: TrackState,
    /// Frames in which the track was matched, including the one that created it.
    pub frames_seen: u32,
    pub frames_since_seen: u32,
    /// Pixels per frame.
    pub velocity: (f32, f32),
    /// Kalman only: centroid predicted for this frame before correction.
    pub predicted: Option<(f32, f32)>,
}

impl TrackedObject {
    /// True when a detection was matched to this track in the current frame.
    pub fn seen_this_frame(&self) -> bool {
        self.frames_since_seen == 0
    }

    pub fn centroid(&self) -> (f32, f32) {
        self.detection.detection.centroid()
    }

    pub fn speed_px_per_frame(&self) -> f32 {
        self.velocity.0.hypot(self.velocity.1)
    }

    pub fn is_drone(&self) -> bool {
        self.detection.score.is_drone
    }

    pub fn score(&self) -> f32 {
        self.detection.score.value
    }
}

/// Pass-through tracker: every detection becomes a fresh single-frame track.
#[derive(Default)]
pub struct NoOpTracker {
    next_id: u64,
}

impl NoOpTracker {
    pub fn update(&mut self, detections: &[ScoredDetection]) -> Vec<TrackedObject> {
        detections
            .iter()
            .map(|det| {
                self.next_id += 1;
                TrackedObject {
                    track_id: self.next_id,
                    detection: *det,
                    state: TrackState::New,
                    frames_seen: 1,
                    frames_since_seen: 0,
                    velocity: (0.0, 0.0),
                    predicted: None,
                }
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.next_id = 0;
    }
}

/// Closed set of trackers, selected at startup.
pub enum ObjectTracker {
    None(NoOpTracker),
    Centroid(CentroidTracker),
    Kalman(KalmanTracker),
}

impl ObjectTracker {
    pub fn from_settings(kind: TrackerType, settings: &TrackerSettings) -> Self {
        match kind {
            TrackerType::None => Self::None(NoOpTracker::default()),
            TrackerType::Centroid => Self::Centroid(CentroidTracker::new(settings.clone())),
            TrackerType::Kalman => Self::Kalman(KalmanTracker::new(settings.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None(_) => "none",
            Self::Centroid(_) => "centroid",
            Self::Kalman(_) => "kalman",
        }
    }

    /// Advance one frame. Output is ordered by track id.
    pub fn update(&mut self, detections: &[ScoredDetection]) -> Vec<TrackedObject> {
        match self {
            Self::None(t) => t.update(detections),
            Self::Centroid(t) => t.update(detections),
            Self::Kalman(t) => t.update(detections),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::None(t) => t.reset(),
            Self::Centroid(t) => t.reset(),
            Self::Kalman(t) => t.reset(),
        }
    }

    pub fn active_count(&self) -> usize {
        match self {
            Self::None(_) => 0,
            Self::Centroid(t) => t.active_count(),
            Self::Kalman(t) => t.active_count(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DroneScoreSettings;
    use crate::detect::Detection;
    use crate::score::score_all;

    fn scored(boxes: &[(f32, f32)]) -> Vec<ScoredDetection> {
        let dets: Vec<Detection> = boxes
            .iter()
            .map(|(x, y)| Detection::new(*x, *y, 40.0, 40.0, 0, 0.9))
            .collect();
        score_all(&dets, &DroneScoreSettings::default())
    }

    fn settings(max_disappeared: u32) -> TrackerSettings {
        TrackerSettings {
            max_disappeared,
            ..TrackerSettings::default()
        }
    }

    fn trackers(max_disappeared: u32) -> Vec<ObjectTracker> {
        vec![
            ObjectTracker::from_settings(TrackerType::Centroid, &settings(max_disappeared)),
            ObjectTracker::from_settings(TrackerType::Kalman, &settings(max_disappeared)),
        ]
    }

    #[test]
    fn single_moving_object_keeps_one_id() {
        for mut tracker in trackers(30) {
            let mut ids = Vec::new();
            for step in 0..60 {
                let x = 10.0 + step as f32 * 6.0;
                let y = 200.0 + step as f32 * 1.5;
                let out = tracker.update(&scored(&[(x, y)]));
                assert_eq!(out.len(), 1, "{}", tracker.name());
                ids.push(out[0].track_id);
            }
            assert!(ids.iter().all(|id| *id == 1), "{}: {:?}", tracker.name(), ids);
        }
    }

    #[test]
    fn states_progress_new_matched_lost() {
        for mut tracker in trackers(5) {
            assert_eq!(tracker.update(&scored(&[(0.0, 0.0)]))[0].state, TrackState::New);
            assert_eq!(
                tracker.update(&scored(&[(2.0, 0.0)]))[0].state,
                TrackState::Matched
            );
            let lost = tracker.update(&[]);
            assert_eq!(lost[0].state, TrackState::Lost);
            assert_eq!(lost[0].frames_since_seen, 1);
        }
    }

    #[test]
    fn expired_track_is_deleted_and_id_not_reused() {
        for mut tracker in trackers(3) {
            tracker.update(&scored(&[(100.0, 100.0)]));
            for missed in 1..=3 {
                let out = tracker.update(&[]);
                assert_eq!(out.len(), 1, "still lost after {missed} misses");
            }
            assert!(tracker.update(&[]).is_empty(), "{}", tracker.name());
            let out = tracker.update(&scored(&[(100.0, 100.0)]));
            assert_eq!(out[0].track_id, 2);
        }
    }

    #[test]
    fn two_objects_get_distinct_stable_ids() {
        for mut tracker in trackers(10) {
            let mut last = Vec::new();
            for step in 0..20 {
                let s = step as f32 * 4.0;
                last = tracker.update(&scored(&[(50.0 + s, 50.0), (400.0 - s, 300.0)]));
            }
            let ids: Vec<u64> = last.iter().map(|t| t.track_id).collect();
            assert_eq!(ids, vec![1, 2], "{}", tracker.name());
        }
    }

    #[test]
    fn kalman_bridges_occlusion_that_centroid_cannot() {
        let run = |kind| {
            let mut tracker = ObjectTracker::from_settings(kind, &settings(10));
            let mut x = 0.0;
            for _ in 0..15 {
                tracker.update(&scored(&[(x, 200.0)]));
                x += 30.0;
            }
            for _ in 0..4 {
                tracker.update(&[]);
                x += 30.0;
            }
            let out = tracker.update(&scored(&[(x, 200.0)]));
            out.iter()
                .find(|t| t.seen_this_frame())
                .map(|t| t.track_id)
                .expect("matched or new track")
        };
        assert_eq!(run(TrackerType::Kalman), 1);
        assert_eq!(run(TrackerType::Centroid), 2);
    }

    #[test]
    fn identical_input_gives_identical_ids() {
        let frames: Vec<Vec<ScoredDetection>> = (0..25)
            .map(|i| {
                let s = i as f32 * 3.0;
                scored(&[(10.0 + s, 10.0), (12.0 + s, 60.0), (300.0, 300.0 - s)])
            })
            .collect();
        for kind in [TrackerType::Centroid, TrackerType::Kalman] {
            let mut a = ObjectTracker::from_settings(kind, &settings(5));
            let mut b = ObjectTracker::from_settings(kind, &settings(5));
            for frame in &frames {
                assert_eq!(a.update(frame), b.update(frame));
            }
        }
    }

    #[test]
    fn noop_issues_fresh_ids_every_frame() {
        let mut tracker = ObjectTracker::from_settings(TrackerType::None, &settings(5));
        let first = tracker.update(&scored(&[(0.0, 0.0)]));
        let second = tracker.update(&scored(&[(0.0, 0.0)]));
        assert_eq!(first[0].track_id, 1);
        assert_eq!(second[0].track_id, 2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn reset_clears_tracks() {
        for mut tracker in trackers(5) {
            tracker.update(&scored(&[(0.0, 0.0)]));
            tracker.reset();
            assert_eq!(tracker.active_count(), 0);
            assert_eq!(tracker.update(&scored(&[(0.0, 0.0)]))[0].track_id, 1);
        }
    }
}
