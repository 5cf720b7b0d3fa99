//! Constant-velocity Kalman tracker.
//!
//! State is `[x, y, vx, vy]` in pixels and pixels per frame; measurements are
//! detection centroids. Every track is predicted once per frame, including
//! lost ones, so a target that reappears after a short occlusion lands near
//! its prediction and keeps its id.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

use super::assign::{greedy_assign, Pairing};
use super::{TrackState, TrackedObject};
use crate::config::TrackerSettings;
use crate::score::ScoredDetection;

const INITIAL_COVARIANCE: f32 = 100.0;

/// Shared motion and measurement model.
#[derive(Clone, Debug)]
struct Model {
    f: Matrix4<f32>,
    h: Matrix2x4<f32>,
    q: Matrix4<f32>,
    r: Matrix2<f32>,
}

impl Model {
    fn new(process_noise: f32, measurement_noise: f32) -> Self {
        let mut f = Matrix4::identity();
        f[(0, 2)] = 1.0;
        f[(1, 3)] = 1.0;
        let mut h = Matrix2x4::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        Self {
            f,
            h,
            q: Matrix4::identity() * process_noise,
            r: Matrix2::identity() * measurement_noise,
        }
    }
}

#[derive(Clone, Debug)]
struct KalmanState {
    x: Vector4<f32>,
    p: Matrix4<f32>,
}

impl KalmanState {
    fn at(position: (f32, f32)) -> Self {
        Self {
            x: Vector4::new(position.0, position.1, 0.0, 0.0),
            p: Matrix4::identity() * INITIAL_COVARIANCE,
        }
    }

    fn predict(&mut self, m: &Model) {
        self.x = m.f * self.x;
        self.p = m.f * self.p * m.f.transpose() + m.q;
    }

    /// Residual, innovation covariance inverse, and Mahalanobis distance for `z`.
    fn innovation(&self, m: &Model, z: Vector2<f32>) -> Option<(Vector2<f32>, Matrix2<f32>, f32)> {
        let y = z - m.h * self.x;
        let s = m.h * self.p * m.h.transpose() + m.r;
        let s_inv = s.try_inverse()?;
        let d2 = (y.transpose() * s_inv * y)[(0, 0)];
        Some((y, s_inv, d2.max(0.0).sqrt()))
    }

    fn correct(&mut self, m: &Model, z: Vector2<f32>) {
        let Some((y, s_inv, _)) = self.innovation(m, z) else {
            return;
        };
        let k = self.p * m.h.transpose() * s_inv;
        self.x += k * y;
        self.p = (Matrix4::identity() - k * m.h) * self.p;
    }

    fn position(&self) -> (f32, f32) {
        (self.x[0], self.x[1])
    }

    fn velocity(&self) -> (f32, f32) {
        (self.x[2], self.x[3])
    }
}

struct KalmanTrack {
    id: u64,
    detection: ScoredDetection,
    filter: KalmanState,
    predicted: (f32, f32),
    state: TrackState,
    frames_seen: u32,
    frames_since_seen: u32,
}

impl KalmanTrack {
    fn snapshot(&self) -> TrackedObject {
        TrackedObject {
            track_id: self.id,
            detection: self.detection,
            state: self.state,
            frames_seen: self.frames_seen,
            frames_since_seen: self.frames_since_seen,
            velocity: self.filter.velocity(),
            predicted: Some(self.predicted),
        }
    }
}

pub struct KalmanTracker {
    settings: TrackerSettings,
    model: Model,
    tracks: Vec<KalmanTrack>,
    next_id: u64,
}

impl KalmanTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            model: Model::new(settings.process_noise, settings.measurement_noise),
            settings,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn update(&mut self, detections: &[ScoredDetection]) -> Vec<TrackedObject> {
        for track in &mut self.tracks {
            track.filter.predict(&self.model);
            track.predicted = track.filter.position();
        }

        let mut pairs = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            let (px, py) = track.predicted;
            for (di, det) in detections.iter().enumerate() {
                let (cx, cy) = det.detection.centroid();
                if (cx - px).hypot(cy - py) > self.settings.max_distance {
                    continue;
                }
                let Some((_, _, mahalanobis)) =
                    track.filter.innovation(&self.model, Vector2::new(cx, cy))
                else {
                    continue;
                };
                if mahalanobis <= self.settings.mahalanobis_gate {
                    pairs.push(Pairing {
                        cost: mahalanobis,
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
            let (cx, cy) = detections[di].detection.centroid();
            track.filter.correct(&self.model, Vector2::new(cx, cy));
            track.detection = detections[di];
            track.state = TrackState::Matched;
            track.frames_seen += 1;
            track.frames_since_seen = 0;
        }

        for (track, matched) in self.tracks.iter_mut().zip(&matched_tracks) {
            if !matched {
                track.frames_since_seen += 1;
                track.state = TrackState::Lost;
            }
        }
        let max_disappeared = self.settings.max_disappeared;
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
            let centroid = det.detection.centroid();
            self.tracks.push(KalmanTrack {
                id,
                detection: *det,
                filter: KalmanState::at(centroid),
                predicted: centroid,
                state: TrackState::New,
                frames_seen: 1,
                frames_since_seen: 0,
            });
        }

        self.tracks.iter().map(KalmanTrack::snapshot).collect()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    pub fn active_count(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_learns_constant_velocity() {
        let model = Model::new(1.0, 1.0);
        let mut kf = KalmanState::at((0.0, 0.0));
        for step in 1..=20 {
            kf.predict(&model);
            kf.correct(&model, Vector2::new(step as f32 * 10.0, 0.0));
        }
        let (vx, vy) = kf.velocity();
        assert!((vx - 10.0).abs() < 0.5, "vx={vx}");
        assert!(vy.abs() < 0.5);
    }

    #[test]
    fn mahalanobis_grows_with_residual() {
        let model = Model::new(1.0, 1.0);
        let mut kf = KalmanState::at((0.0, 0.0));
        for _ in 0..5 {
            kf.predict(&model);
            kf.correct(&model, Vector2::new(0.0, 0.0));
        }
        kf.predict(&model);
        let near = kf.innovation(&model, Vector2::new(1.0, 0.0)).expect("s").2;
        let far = kf.innovation(&model, Vector2::new(20.0, 0.0)).expect("s").2;
        assert!(near < far);
    }
}
