//! Single-target lock state machine.
//!
//! ```text
//! Unlocked -> Acquiring -> Locked -> Engaged -> Unlocked
//!                             \---> Expired -> Unlocked
//! ```
//!
//! Engaged and Expired last exactly one update. The timeout runs on the
//! monotonic clock passed in by the caller, not on frame counts.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::TargetingSettings;

pub const CONFIDENCE_HISTORY_LEN: usize = 60;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    #[default]
    Unlocked,
    Acquiring,
    Locked,
    Engaged,
    Expired,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Acquiring => "acquiring",
            Self::Locked => "locked",
            Self::Engaged => "engaged",
            Self::Expired => "expired",
        }
    }
}

/// Targeting view of one live track for the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TargetInfo {
    pub track_id: u64,
    pub seen_this_frame: bool,
    pub is_drone: bool,
    /// Drone score.
    pub confidence: f32,
    pub frames_seen: u32,
    pub distance_m: f32,
    pub velocity_ms: f32,
    pub centroid: (f32, f32),
    /// Centroid advanced along the track velocity by the lead factor.
    pub lead_point: (f32, f32),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LockStatus {
    pub state: LockState,
    pub track_id: Option<u64>,
    pub mean_confidence: Option<f32>,
    pub locked_for_ms: Option<u64>,
}

struct Lock {
    track_id: u64,
    qualifying_frames: u32,
    locked_at: Option<Instant>,
    last_refresh: Instant,
    history: VecDeque<f32>,
}

impl Lock {
    fn start(track_id: u64, now: Instant) -> Self {
        Self {
            track_id,
            qualifying_frames: 0,
            locked_at: None,
            last_refresh: now,
            history: VecDeque::with_capacity(CONFIDENCE_HISTORY_LEN),
        }
    }

    fn refresh(&mut self, confidence: f32, now: Instant) {
        self.last_refresh = now;
        if self.history.len() == CONFIDENCE_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(confidence);
    }

    fn mean_confidence(&self) -> Option<f32> {
        if self.history.is_empty() {
            return None;
        }
        Some(self.history.iter().sum::<f32>() / self.history.len() as f32)
    }
}

pub struct LockManager {
    min_confidence: f32,
    max_distance_m: f32,
    min_frames: u32,
    timeout: Duration,
    state: LockState,
    lock: Option<Lock>,
}

impl LockManager {
    pub fn new(settings: &TargetingSettings) -> Self {
        Self {
            min_confidence: settings.min_confidence_for_lock,
            max_distance_m: settings.max_targeting_distance_m,
            min_frames: settings.lock_min_frames,
            timeout: settings.lock_timeout(),
            state: LockState::Unlocked,
            lock: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn track_id(&self) -> Option<u64> {
        self.lock.as_ref().map(|l| l.track_id)
    }

    pub fn confidence_history(&self) -> Vec<f32> {
        self.lock
            .as_ref()
            .map(|l| l.history.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn status(&self, now: Instant) -> LockStatus {
        LockStatus {
            state: self.state,
            track_id: self.track_id(),
            mean_confidence: self.lock.as_ref().and_then(Lock::mean_confidence),
            locked_for_ms: self
                .lock
                .as_ref()
                .and_then(|l| l.locked_at)
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }

    /// Whether a target may be (or stay) the lock target.
    pub fn qualifies(&self, t: &TargetInfo) -> bool {
        t.seen_this_frame
            && t.is_drone
            && t.confidence >= self.min_confidence
            && t.distance_m <= self.max_distance_m
    }

    /// Closest qualifying target; ties go to the lowest track id.
    pub fn best_candidate<'a>(&self, targets: &'a [TargetInfo]) -> Option<&'a TargetInfo> {
        targets
            .iter()
            .filter(|t| self.qualifies(t))
            .min_by(|a, b| {
                a.distance_m
                    .partial_cmp(&b.distance_m)
                    .unwrap_or(Ordering::Equal)
                    .then(a.track_id.cmp(&b.track_id))
            })
    }

    pub fn update(&mut self, targets: &[TargetInfo], now: Instant) -> LockState {
        match self.state {
            LockState::Engaged | LockState::Expired => self.clear(),
            LockState::Unlocked => {
                if let Some(best) = self.best_candidate(targets).copied() {
                    self.begin(&best, now);
                }
            }
            LockState::Acquiring => self.continue_acquiring(targets, now),
            LockState::Locked => self.hold(targets, now),
        }
        self.state
    }

    /// Record that the locked target was fired on.
    pub fn engage(&mut self) -> bool {
        if self.state == LockState::Locked {
            self.state = LockState::Engaged;
            true
        } else {
            false
        }
    }

    pub fn release(&mut self) {
        self.clear();
    }

    fn begin(&mut self, target: &TargetInfo, now: Instant) {
        log::debug!("acquiring track {}", target.track_id);
        let mut lock = Lock::start(target.track_id, now);
        lock.refresh(target.confidence, now);
        self.lock = Some(lock);
        self.state = LockState::Acquiring;
        self.promote_if_ready(now);
    }

    fn continue_acquiring(&mut self, targets: &[TargetInfo], now: Instant) {
        let best = self.best_candidate(targets).copied();
        let current = self.track_id();
        match best {
            Some(best) if Some(best.track_id) == current => {
                if let Some(lock) = self.lock.as_mut() {
                    lock.qualifying_frames += 1;
                    lock.refresh(best.confidence, now);
                }
                self.promote_if_ready(now);
            }
            Some(best) => self.begin(&best, now),
            None => self.clear(),
        }
    }

    fn promote_if_ready(&mut self, now: Instant) {
        let Some(lock) = self.lock.as_mut() else {
            return;
        };
        if lock.qualifying_frames >= self.min_frames {
            lock.locked_at = Some(now);
            self.state = LockState::Locked;
            log::info!("target locked: track {}", lock.track_id);
        }
    }

    fn hold(&mut self, targets: &[TargetInfo], now: Instant) {
        let Some(track_id) = self.track_id() else {
            self.clear();
            return;
        };
        let target = targets.iter().find(|t| t.track_id == track_id).copied();
        let qualifies = target.map(|t| self.qualifies(&t)).unwrap_or(false);
        let Some(lock) = self.lock.as_mut() else {
            return;
        };
        match target {
            Some(t) if t.seen_this_frame && !(t.confidence >= self.min_confidence) => {
                log::info!(
                    "lock on track {track_id} released: confidence {:.2} below {:.2}",
                    t.confidence,
                    self.min_confidence
                );
                self.clear();
            }
            Some(t) if qualifies => lock.refresh(t.confidence, now),
            _ => {
                if now.saturating_duration_since(lock.last_refresh) >= self.timeout {
                    log::info!("lock on track {track_id} expired");
                    self.state = LockState::Expired;
                }
            }
        }
    }

    fn clear(&mut self) {
        self.lock = None;
        self.state = LockState::Unlocked;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
