//! Fire authorization checklist.
//!
//! Each interlock is a pure predicate over the candidate, the targeting
//! settings and the fire context. [`evaluate`] runs them in a fixed order and
//! stops at the first failure. Comparisons are written so that NaN inputs fail.

use serde::Serialize;
use std::time::Instant;

use crate::config::TargetingSettings;

/// Target facts the checklist decides on.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FireCandidate {
    pub track_id: u64,
    /// Drone score of the track's latest detection.
    pub confidence: f32,
    pub track_frames: u32,
    pub distance_m: f32,
    pub velocity_ms: f32,
}

/// Operator and timing state at the moment of the attempt.
#[derive(Clone, Copy, Debug)]
pub struct FireContext {
    pub armed: bool,
    pub now: Instant,
    pub last_fire: Option<Instant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotArmed,
    NotEnabled,
    LowConfidence,
    InsufficientTrack,
    DistanceTooClose,
    DistanceTooFar,
    TooFast,
    Cooldown,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotArmed => "not_armed",
            Self::NotEnabled => "not_enabled",
            Self::LowConfidence => "low_confidence",
            Self::InsufficientTrack => "insufficient_track",
            Self::DistanceTooClose => "distance_too_close",
            Self::DistanceTooFar => "distance_too_far",
            Self::TooFast => "too_fast",
            Self::Cooldown => "cooldown",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Interlock = fn(&FireCandidate, &TargetingSettings, &FireContext) -> Result<(), RejectReason>;

/// The checklist, in evaluation order.
pub const INTERLOCKS: [(&str, Interlock); 8] = [
    ("armed", armed),
    ("enabled", enabled),
    ("confidence", confidence),
    ("track_age", track_age),
    ("min_distance", min_distance),
    ("max_distance", max_distance),
    ("velocity", velocity),
    ("cooldown", cooldown),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct InterlockResult {
    pub check: &'static str,
    pub passed: bool,
}

/// Outcome of running the checklist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Checklist {
    /// Checks that ran, in order. Ends at the first failure.
    pub results: Vec<InterlockResult>,
    pub verdict: Result<(), RejectReason>,
}

impl Checklist {
    pub fn passed(&self) -> bool {
        self.verdict.is_ok()
    }
}

pub fn evaluate(
    candidate: &FireCandidate,
    settings: &TargetingSettings,
    ctx: &FireContext,
) -> Checklist {
    let mut results = Vec::with_capacity(INTERLOCKS.len());
    for (check, predicate) in INTERLOCKS {
        let outcome = predicate(candidate, settings, ctx);
        results.push(InterlockResult {
            check,
            passed: outcome.is_ok(),
        });
        if let Err(reason) = outcome {
            return Checklist {
                results,
                verdict: Err(reason),
            };
        }
    }
    Checklist {
        results,
        verdict: Ok(()),
    }
}

pub fn armed(_: &FireCandidate, _: &TargetingSettings, ctx: &FireContext) -> Result<(), RejectReason> {
    if ctx.armed {
        Ok(())
    } else {
        Err(RejectReason::NotArmed)
    }
}

pub fn enabled(
    _: &FireCandidate,
    settings: &TargetingSettings,
    _: &FireContext,
) -> Result<(), RejectReason> {
    if settings.fire_net_enabled {
        Ok(())
    } else {
        Err(RejectReason::NotEnabled)
    }
}

pub fn confidence(
    c: &FireCandidate,
    settings: &TargetingSettings,
    _: &FireContext,
) -> Result<(), RejectReason> {
    if c.confidence >= settings.fire_net_min_confidence {
        Ok(())
    } else {
        Err(RejectReason::LowConfidence)
    }
}

pub fn track_age(
    c: &FireCandidate,
    settings: &TargetingSettings,
    _: &FireContext,
) -> Result<(), RejectReason> {
    if c.track_frames >= settings.fire_net_min_track_frames {
        Ok(())
    } else {
        Err(RejectReason::InsufficientTrack)
    }
}

pub fn min_distance(
    c: &FireCandidate,
    settings: &TargetingSettings,
    _: &FireContext,
) -> Result<(), RejectReason> {
    if c.distance_m >= settings.fire_net_min_distance_m {
        Ok(())
    } else {
        Err(RejectReason::DistanceTooClose)
    }
}

pub fn max_distance(
    c: &FireCandidate,
    settings: &TargetingSettings,
    _: &FireContext,
) -> Result<(), RejectReason> {
    if c.distance_m <= settings.fire_net_max_distance_m {
        Ok(())
    } else {
        Err(RejectReason::DistanceTooFar)
    }
}

pub fn velocity(
    c: &FireCandidate,
    settings: &TargetingSettings,
    _: &FireContext,
) -> Result<(), RejectReason> {
    if c.velocity_ms <= settings.fire_net_velocity_threshold_ms {
        Ok(())
    } else {
        Err(RejectReason::TooFast)
    }
}

pub fn cooldown(
    _: &FireCandidate,
    settings: &TargetingSettings,
    ctx: &FireContext,
) -> Result<(), RejectReason> {
    match ctx.last_fire {
        Some(last) if ctx.now.saturating_duration_since(last) < settings.fire_cooldown() => {
            Err(RejectReason::Cooldown)
        }
        _ => Ok(()),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> TargetingSettings {
        TargetingSettings {
            fire_net_enabled: true,
            ..TargetingSettings::default()
        }
    }

    fn passing() -> (FireCandidate, FireContext) {
        (
            FireCandidate {
                track_id: 3,
                confidence: 0.95,
                track_frames: 20,
                distance_m: 20.0,
                velocity_ms: 5.0,
            },
            FireContext {
                armed: true,
                now: Instant::now(),
                last_fire: None,
            },
        )
    }

    #[test]
    fn all_passing_checks_authorize() {
        let (c, ctx) = passing();
        let checklist = evaluate(&c, &settings(), &ctx);
        assert!(checklist.passed());
        assert_eq!(checklist.results.len(), INTERLOCKS.len());
        assert!(checklist.results.iter().all(|r| r.passed));
    }

    #[test]
    fn each_interlock_rejects_independently() {
        type Breaker = fn(&mut FireCandidate, &mut TargetingSettings, &mut FireContext);
        let cases: [(Breaker, RejectReason); 8] = [
            (|_, _, ctx| ctx.armed = false, RejectReason::NotArmed),
            (|_, s, _| s.fire_net_enabled = false, RejectReason::NotEnabled),
            (|c, _, _| c.confidence = 0.84, RejectReason::LowConfidence),
            (|c, _, _| c.track_frames = 9, RejectReason::InsufficientTrack),
            (|c, _, _| c.distance_m = 4.9, RejectReason::DistanceTooClose),
            (|c, _, _| c.distance_m = 50.1, RejectReason::DistanceTooFar),
            (|c, _, _| c.velocity_ms = 30.5, RejectReason::TooFast),
            (
                |_, _, ctx| ctx.last_fire = Some(ctx.now - Duration::from_secs(3)),
                RejectReason::Cooldown,
            ),
        ];
        for (index, (breaker, expected)) in cases.into_iter().enumerate() {
            let (mut c, mut ctx) = passing();
            let mut s = settings();
            breaker(&mut c, &mut s, &mut ctx);
            let checklist = evaluate(&c, &s, &ctx);
            assert_eq!(checklist.verdict, Err(expected));
            assert_eq!(checklist.results.len(), index + 1, "short-circuits at {expected}");
            assert!(!checklist.results[index].passed);
        }
    }

    #[test]
    fn first_failure_wins() {
        let (mut c, mut ctx) = passing();
        ctx.armed = false;
        c.distance_m = 1.0;
        let checklist = evaluate(&c, &settings(), &ctx);
        assert_eq!(checklist.verdict, Err(RejectReason::NotArmed));
        assert_eq!(checklist.results.len(), 1);
    }

    #[test]
    fn nan_inputs_fail_closed() {
        let (mut c, ctx) = passing();
        c.distance_m = f32::NAN;
        assert_eq!(
            evaluate(&c, &settings(), &ctx).verdict,
            Err(RejectReason::DistanceTooClose)
        );
        let (mut c, ctx) = passing();
        c.velocity_ms = f32::NAN;
        assert_eq!(
            evaluate(&c, &settings(), &ctx).verdict,
            Err(RejectReason::TooFast)
        );
    }

    #[test]
    fn boundaries_are_inclusive() {
        let (mut c, ctx) = passing();
        c.confidence = 0.85;
        c.track_frames = 10;
        c.distance_m = 5.0;
        c.velocity_ms = 30.0;
        assert!(evaluate(&c, &settings(), &ctx).passed());
        c.distance_m = 50.0;
        assert!(evaluate(&c, &settings(), &ctx).passed());
    }

    #[test]
    fn cooldown_elapses() {
        let (c, mut ctx) = passing();
        ctx.last_fire = Some(ctx.now - Duration::from_secs(10));
        assert!(evaluate(&c, &settings(), &ctx).passed());
    }
}
