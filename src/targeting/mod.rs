//! Range estimation, target lock and the net launcher.
//!
//! [`TargetingSystem`] is owned by the pipeline loop. It turns the tracker's
//! output into [`TargetInfo`] records, advances the lock state machine and,
//! when automatic engagement is enabled, hands the locked target to the
//! [`FireNetController`].

pub mod actuator;
pub mod audit;
mod distance;
pub mod fire;
pub mod interlock;
mod lock;

use anyhow::Result;
use serde::Serialize;
use std::time::{Duration, Instant};

pub use actuator::{Actuator, PulseRecord, RecordingActuator, SimulatedActuator, SysfsGpioActuator};
pub use audit::{verify_chain, FireEvent, FireLog, FireOutcome};
pub use distance::DistanceEstimator;
pub use fire::{ArmSwitch, FireNetController};
pub use interlock::{FireCandidate, RejectReason};
pub use lock::{LockManager, LockState, LockStatus, TargetInfo};

use crate::config::TargetingSettings;
use crate::frame::FrameMeta;
use crate::track::TrackedObject;

/// Used until two frame timestamps are available.
const NOMINAL_FRAME_DT_S: f32 = 1.0 / 30.0;
/// Minimum spacing of automatic attempts on the same track.
const AUTO_ENGAGE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetingStatus {
    pub lock: LockStatus,
    pub target: Option<TargetInfo>,
    pub armed: bool,
    pub fire_enabled: bool,
    pub last_fire_ms: Option<u64>,
    pub last_outcome: Option<FireOutcome>,
}

pub struct TargetingSystem {
    settings: TargetingSettings,
    estimator: Option<(u32, DistanceEstimator)>,
    lock: LockManager,
    fire: FireNetController,
    targets: Vec<TargetInfo>,
    last_frame_ms: Option<u64>,
    last_auto_attempt: Option<(u64, Instant)>,
}

impl TargetingSystem {
    pub fn new(settings: TargetingSettings, fire: FireNetController) -> Self {
        Self {
            lock: LockManager::new(&settings),
            settings,
            estimator: None,
            fire,
            targets: Vec::new(),
            last_frame_ms: None,
            last_auto_attempt: None,
        }
    }

    pub fn from_settings(settings: &TargetingSettings, arm: ArmSwitch) -> Result<Self> {
        let fire = FireNetController::from_settings(settings, arm)?;
        Ok(Self::new(settings.clone(), fire))
    }

    pub fn fire(&self) -> &FireNetController {
        &self.fire
    }

    pub fn fire_mut(&mut self) -> &mut FireNetController {
        &mut self.fire
    }

    pub fn lock_state(&self) -> LockState {
        self.lock.state()
    }

    /// Targeting view of the tracks from the last update, in track order.
    pub fn targets(&self) -> &[TargetInfo] {
        &self.targets
    }

    pub fn locked_target(&self) -> Option<&TargetInfo> {
        let id = self.lock.track_id()?;
        self.targets.iter().find(|t| t.track_id == id)
    }

    pub fn update(
        &mut self,
        tracks: &[TrackedObject],
        meta: &FrameMeta,
        now: Instant,
    ) -> TargetingStatus {
        let estimator = self.estimator_for(meta.width);
        let frame_dt = self.frame_dt(meta.timestamp_ms);
        let lead = self.settings.tracking_lead_factor;
        self.targets = tracks
            .iter()
            .map(|t| target_info(t, &estimator, frame_dt, lead))
            .collect();

        let state = self.lock.update(&self.targets, now);
        let mut outcome = None;
        if state == LockState::Locked && self.settings.auto_engage {
            outcome = self.auto_engage(now, meta.timestamp_ms);
        }
        self.status(now, outcome)
    }

    /// Fire on the locked target, if any. Operator and auto-engage path.
    pub fn request_fire(&mut self, now: Instant, timestamp_ms: u64) -> Option<FireOutcome> {
        if self.lock.state() != LockState::Locked {
            return None;
        }
        let target = *self.locked_target()?;
        let candidate = FireCandidate {
            track_id: target.track_id,
            confidence: target.confidence,
            track_frames: target.frames_seen,
            distance_m: target.distance_m,
            velocity_ms: target.velocity_ms,
        };
        let outcome = self.fire.attempt_fire(&candidate, now, timestamp_ms);
        if outcome.fired() {
            self.lock.engage();
        }
        Some(outcome)
    }

    pub fn status(&self, now: Instant, last_outcome: Option<FireOutcome>) -> TargetingStatus {
        TargetingStatus {
            lock: self.lock.status(now),
            target: self.locked_target().copied(),
            armed: self.fire.is_armed(),
            fire_enabled: self.settings.fire_net_enabled,
            last_fire_ms: self.fire.last_fire_ms(),
            last_outcome,
        }
    }

    /// Drop the lock and the per-frame targets without touching the arm state.
    /// Used when the frame source stalls: nothing may stay locked on old data.
    pub fn release_lock(&mut self) {
        if let Some(id) = self.lock.track_id() {
            log::warn!("releasing lock on track {id}: no fresh frames");
        }
        self.lock.release();
        self.targets.clear();
        self.last_frame_ms = None;
        self.last_auto_attempt = None;
    }

    pub fn shutdown(&mut self) {
        self.lock.release();
        self.fire.shutdown();
    }

    fn auto_engage(&mut self, now: Instant, timestamp_ms: u64) -> Option<FireOutcome> {
        let track_id = self.lock.track_id()?;
        if let Some((last_id, at)) = self.last_auto_attempt {
            if last_id == track_id && now.saturating_duration_since(at) < AUTO_ENGAGE_INTERVAL {
                return None;
            }
        }
        self.last_auto_attempt = Some((track_id, now));
        self.request_fire(now, timestamp_ms)
    }

    fn estimator_for(&mut self, frame_width: u32) -> DistanceEstimator {
        match self.estimator {
            Some((width, estimator)) if width == frame_width => estimator,
            _ => {
                let estimator = DistanceEstimator::new(&self.settings, frame_width);
                self.estimator = Some((frame_width, estimator));
                estimator
            }
        }
    }

    fn frame_dt(&mut self, timestamp_ms: u64) -> f32 {
        let dt = self
            .last_frame_ms
            .and_then(|prev| timestamp_ms.checked_sub(prev))
            .filter(|ms| *ms > 0)
            .map(|ms| ms as f32 / 1000.0)
            .unwrap_or(NOMINAL_FRAME_DT_S);
        self.last_frame_ms = Some(timestamp_ms);
        dt
    }
}

fn target_info(
    track: &TrackedObject,
    estimator: &DistanceEstimator,
    frame_dt_s: f32,
    lead_factor: f32,
) -> TargetInfo {
    let detection = &track.detection.detection;
    let centroid = track.centroid();
    TargetInfo {
        track_id: track.track_id,
        seen_this_frame: track.seen_this_frame(),
        is_drone: track.is_drone(),
        confidence: track.score(),
        frames_seen: track.frames_seen,
        distance_m: estimator.distance_m(detection),
        velocity_ms: estimator.speed_ms(detection, track.velocity, frame_dt_s),
        centroid,
        lead_point: (
            centroid.0 + track.velocity.0 * lead_factor,
            centroid.1 + track.velocity.1 * lead_factor,
        ),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;
    use crate::score::{DroneScore, ScoredDetection};
    use crate::track::TrackState;

    fn track(track_id: u64, size: f32, score: f32, frames_seen: u32) -> TrackedObject {
        TrackedObject {
            track_id,
            detection: ScoredDetection {
                detection: Detection::new(100.0, 100.0, size, size, 0, score),
                score: DroneScore {
                    value: score,
                    is_drone: true,
                },
            },
            state: TrackState::Matched,
            frames_seen,
            frames_since_seen: 0,
            velocity: (2.0, 0.0),
            predicted: None,
        }
    }

    fn meta(seq: u64) -> FrameMeta {
        FrameMeta {
            sequence: seq,
            timestamp_ms: 1_000 + seq * 33,
            width: 640,
            height: 480,
        }
    }

    fn system(settings: TargetingSettings) -> (TargetingSystem, PulseRecord) {
        let (actuator, record) = RecordingActuator::new();
        let fire = FireNetController::new(
            settings.clone(),
            Box::new(actuator),
            ArmSwitch::new(),
            FireLog::in_memory(64),
        );
        (TargetingSystem::new(settings, fire), record)
    }

    #[test]
    fn locks_closest_drone_and_reports_lead_point() {
        let (mut sys, _) = system(TargetingSettings::default());
        let now = Instant::now();
        // 10 px box is ~15.9 m; 20 px box is ~7.9 m.
        let tracks = [track(1, 10.0, 0.9, 5), track(2, 20.0, 0.9, 5)];
        sys.update(&tracks, &meta(0), now);
        let status = sys.update(&tracks, &meta(1), now);
        assert_eq!(status.lock.state, LockState::Locked);
        let target = status.target.expect("locked target");
        assert_eq!(target.track_id, 2);
        assert!((target.distance_m - 7.93).abs() < 0.05);
        assert!((target.lead_point.0 - (110.0 + 2.4)).abs() < 1e-3);
    }

    #[test]
    fn no_auto_fire_without_auto_engage() {
        let settings = TargetingSettings {
            fire_net_enabled: true,
            ..TargetingSettings::default()
        };
        let (mut sys, record) = system(settings);
        sys.fire().arm().expect("arm");
        let now = Instant::now();
        let tracks = [track(1, 20.0, 0.95, 30)];
        for seq in 0..5 {
            sys.update(&tracks, &meta(seq), now);
        }
        assert_eq!(record.count(), 0);
        assert!(sys.fire().fire_log().is_empty());
    }

    #[test]
    fn auto_engage_fires_once_and_engages_lock() {
        let settings = TargetingSettings {
            fire_net_enabled: true,
            auto_engage: true,
            ..TargetingSettings::default()
        };
        let (mut sys, record) = system(settings);
        sys.fire().arm().expect("arm");
        let now = Instant::now();
        let tracks = [track(1, 20.0, 0.95, 30)];
        sys.update(&tracks, &meta(0), now);
        let status = sys.update(&tracks, &meta(1), now);
        assert_eq!(status.last_outcome, Some(FireOutcome::Fired));
        assert_eq!(status.lock.state, LockState::Engaged);
        assert_eq!(record.count(), 1);
        assert_eq!(status.last_fire_ms, Some(1_033));
        assert_eq!(sys.update(&tracks, &meta(2), now).lock.state, LockState::Unlocked);
    }

    #[test]
    fn auto_engage_rejection_is_recorded_and_rate_limited() {
        let settings = TargetingSettings {
            fire_net_enabled: true,
            auto_engage: true,
            ..TargetingSettings::default()
        };
        let (mut sys, record) = system(settings);
        let now = Instant::now();
        let tracks = [track(1, 20.0, 0.95, 30)];
        for seq in 0..10 {
            sys.update(&tracks, &meta(seq), now);
        }
        assert_eq!(record.count(), 0);
        let events: Vec<_> = sys.fire().fire_log().events().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].outcome,
            FireOutcome::Rejected {
                reason: RejectReason::NotArmed
            }
        );
    }

    #[test]
    fn released_lock_keeps_arm_state() {
        let settings = TargetingSettings {
            fire_net_enabled: true,
            ..TargetingSettings::default()
        };
        let (mut sys, _) = system(settings);
        sys.fire().arm().expect("arm");
        let now = Instant::now();
        let tracks = [track(1, 20.0, 0.95, 30)];
        sys.update(&tracks, &meta(0), now);
        sys.update(&tracks, &meta(1), now);
        assert_eq!(sys.lock_state(), LockState::Locked);

        sys.release_lock();
        let status = sys.status(now, None);
        assert_eq!(status.lock.state, LockState::Unlocked);
        assert!(status.target.is_none());
        assert!(sys.targets().is_empty());
        assert!(status.armed);
        assert!(sys.request_fire(now, 2_000).is_none());
    }

    #[test]
    fn frame_dt_follows_timestamps() {
        let (mut sys, _) = system(TargetingSettings::default());
        assert!((sys.frame_dt(1_000) - NOMINAL_FRAME_DT_S).abs() < 1e-6);
        assert!((sys.frame_dt(1_100) - 0.1).abs() < 1e-6);
        assert!((sys.frame_dt(1_100) - NOMINAL_FRAME_DT_S).abs() < 1e-6);
    }
}
