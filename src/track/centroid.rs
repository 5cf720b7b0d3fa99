use std::collections::VecDeque;

use super::assign::{greedy_assign, Pairing};
use super::{TrackState, TrackedObject};
use crate::config::TrackerSettings;
use crate::score::ScoredDetection;

const HISTORY_LEN: usize = 32;

struct CentroidTrack {
    id: u64,
    detection: ScoredDetection,
    history: VecDeque<(f32, f32)>,
    state: TrackState,
    frames_seen: u32,
    frames_since_seen: u32,
    velocity: (f32, f32),
}

impl CentroidTrack {
    fn centroid(&self) -> (f32, f32) {
        self.history
            .back()
            .copied()
            .unwrap_or_else(|| self.detection.detection.centroid())
    }

    fn snapshot(&self) -> TrackedObject {
        TrackedObject {
            track_id: self.id,
            detection: self.detection,
            state: self.state,
            frames_seen: self.frames_seen,
            frames_since_seen: self.frames_since_seen,
            velocity: self.velocity,
            predicted: None,
        }
    }
}

/// Nearest-centroid tracker with greedy matching under `max_distance`.
pub struct CentroidTracker {
    settings: TrackerSettings,
    tracks: Vec<CentroidTrack>,
    next_id: u64,
}

impl CentroidTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn update(&mut self, detections: &[ScoredDetection]) -> Vec<TrackedObject> {
        let mut pairs = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            let (tx, ty) = track.centroid();
            for (di, det) in detections.iter().enumerate() {
                let (dx, dy) = det.detection.centroid();
                let dist = (dx - tx).hypot(dy - ty);
                if dist <= self.settings.max_distance {
                    pairs.push(Pairing {
                        cost: dist,
                        track_id: track.id,
                        track: ti,
                        detection: di,
                    });
                }
            }
        }
        let matches = greedy_assign(pairs, self.tracks.len(), detections.len());

        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_detections = vec![false; detections.len()];
        for (ti, di) in matches {
            matched_tracks[ti] = true;
            matched_detections[di] = true;
            let track = &mut self.tracks[ti];
            let previous = track.centroid();
            let current = detections[di].detection.centroid();
            let steps = (track.frames_since_seen + 1) as f32;
            track.velocity = (
                (current.0 - previous.0) / steps,
                (current.1 - previous.1) / steps,
            );
            track.detection = detections[di];
            track.history.push_back(current);
            if track.history.len() > HISTORY_LEN {
                track.history.pop_front();
            }
            track.state = TrackState::Matched;
            track.frames_seen += 1;
            track.frames_since_seen = 0;
        }

        let max_disappeared = self.settings.max_disappeared;
        for (track, matched) in self.tracks.iter_mut().zip(&matched_tracks) {
            if !matched {
                track.frames_since_seen += 1;
                track.state = TrackState::Lost;
            }
        }
        self.tracks.retain(|t| {
            let keep = t.frames_since_seen <= max_disappeared;
            if !keep {
                log::debug!("track {} deleted after {} missed frames", t.id, t.frames_since_seen);
            }
            keep
        });

        for (det, matched) in detections.iter().zip(&matched_detections) {
            if *matched {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            let mut history = VecDeque::with_capacity(HISTORY_LEN);
            history.push_back(det.detection.centroid());
            self.tracks.push(CentroidTrack {
                id,
                detection: *det,
                history,
                state: TrackState::New,
                frames_seen: 1,
                frames_since_seen: 0,
                velocity: (0.0, 0.0),
            });
        }

        self.tracks.iter().map(CentroidTrack::snapshot).collect()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    pub fn active_count(&self) -> usize {
        self.tracks.len()
    }

    /// Recent centroids of a live track, oldest first.
    pub fn history(&self, track_id: u64) -> Option<Vec<(f32, f32)>> {
        self.tracks
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| t.history.iter().copied().collect())
    }
}
