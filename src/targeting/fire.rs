//! Net launcher control.
//!
//! [`FireNetController::attempt_fire`] is the only path to the actuator. Each
//! call runs the interlock checklist, pulses at most once, and records a
//! [`FireEvent`] whatever the outcome. Failed pulses are never retried; the
//! next frame has to produce a new decision.

use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::actuator::{Actuator, SimulatedActuator, SysfsGpioActuator};
use super::audit::{FireEvent, FireLog, FireOutcome, DEFAULT_RECENT_EVENTS};
use super::interlock::{evaluate, FireCandidate, FireContext, RejectReason};
use crate::config::TargetingSettings;

/// Operator arming latch.
///
/// Stays set until explicitly cleared; nothing in the pipeline disarms it
/// except shutdown.
#[derive(Clone, Debug, Default)]
pub struct ArmSwitch(Arc<AtomicBool>);

impl ArmSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn disarm(&self) {
        if self.0.swap(false, Ordering::SeqCst) {
            log::warn!("fire net DISARMED");
        }
    }

    fn set_armed(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            log::warn!("fire net ARMED");
        }
    }
}

pub struct FireNetController {
    settings: TargetingSettings,
    actuator: Box<dyn Actuator>,
    arm: ArmSwitch,
    log: FireLog,
    last_fire: Option<Instant>,
    last_fire_ms: Option<u64>,
    released: bool,
}

impl FireNetController {
    pub fn new(
        settings: TargetingSettings,
        actuator: Box<dyn Actuator>,
        arm: ArmSwitch,
        log: FireLog,
    ) -> Self {
        Self {
            settings,
            actuator,
            arm,
            log,
            last_fire: None,
            last_fire_ms: None,
            released: false,
        }
    }

    /// Build the controller with the actuator the settings call for.
    ///
    /// The GPIO line is only claimed when the launcher is enabled. If the
    /// line cannot be opened the controller runs simulated and says so.
    pub fn from_settings(settings: &TargetingSettings, arm: ArmSwitch) -> Result<Self> {
        let log = match settings.fire_log_path.as_deref() {
            Some(path) => FireLog::with_file(Path::new(path), DEFAULT_RECENT_EVENTS)?,
            None => FireLog::in_memory(DEFAULT_RECENT_EVENTS),
        };
        let actuator: Box<dyn Actuator> = if settings.fire_net_enabled {
            match SysfsGpioActuator::open(settings.fire_net_gpio_pin) {
                Ok(gpio) => Box::new(gpio),
                Err(e) => {
                    log::warn!("GPIO unavailable ({e}); fire net running in SIMULATION mode");
                    Box::new(SimulatedActuator::new())
                }
            }
        } else {
            Box::new(SimulatedActuator::new())
        };
        log::info!(
            "fire net controller: enabled={} actuator={}",
            settings.fire_net_enabled,
            actuator.name()
        );
        Ok(Self::new(settings.clone(), actuator, arm, log))
    }

    pub fn arm_switch(&self) -> ArmSwitch {
        self.arm.clone()
    }

    /// Operator arming. Refused while the launcher is disabled.
    pub fn arm(&self) -> Result<(), RejectReason> {
        if !self.settings.fire_net_enabled {
            log::warn!("arming refused: fire_net_enabled is false");
            return Err(RejectReason::NotEnabled);
        }
        self.arm.set_armed();
        Ok(())
    }

    pub fn disarm(&self) {
        self.arm.disarm();
    }

    pub fn is_armed(&self) -> bool {
        self.arm.is_armed()
    }

    pub fn actuator_name(&self) -> &'static str {
        self.actuator.name()
    }

    pub fn last_fire_ms(&self) -> Option<u64> {
        self.last_fire_ms
    }

    pub fn fire_log(&self) -> &FireLog {
        &self.log
    }

    pub fn attempt_fire(
        &mut self,
        candidate: &FireCandidate,
        now: Instant,
        timestamp_ms: u64,
    ) -> FireOutcome {
        let ctx = FireContext {
            armed: self.arm.is_armed() && !self.released,
            now,
            last_fire: self.last_fire,
        };
        let checklist = evaluate(candidate, &self.settings, &ctx);
        let outcome = match checklist.verdict {
            Err(reason) => {
                log::info!(
                    "fire rejected for track {}: {reason}",
                    candidate.track_id
                );
                FireOutcome::Rejected { reason }
            }
            Ok(()) => {
                // The cooldown starts with the pulse attempt, successful or not.
                self.last_fire = Some(now);
                self.last_fire_ms = Some(timestamp_ms);
                match self.actuator.pulse(self.settings.pulse()) {
                    Ok(()) => {
                        log::warn!(
                            "NET FIRED at track {} ({:.1} m, conf {:.2})",
                            candidate.track_id,
                            candidate.distance_m,
                            candidate.confidence
                        );
                        FireOutcome::Fired
                    }
                    Err(e) => {
                        log::error!("net launch actuation failed: {e}");
                        FireOutcome::ActuationFailed {
                            error: e.to_string(),
                        }
                    }
                }
            }
        };
        self.log.append(FireEvent {
            timestamp_ms,
            track_id: candidate.track_id,
            confidence: candidate.confidence,
            distance_m: candidate.distance_m,
            velocity_ms: candidate.velocity_ms,
            outcome: outcome.clone(),
            checklist: checklist.results,
        });
        outcome
    }

    /// Disarm and drive the output to idle. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.arm.disarm();
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.actuator.release() {
            log::error!("actuator release failed: {e}");
        }
    }
}

impl Drop for FireNetController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targeting::actuator::{PulseRecord, RecordingActuator};
    use std::time::Duration;

    fn enabled() -> TargetingSettings {
        TargetingSettings {
            fire_net_enabled: true,
            ..TargetingSettings::default()
        }
    }

    fn controller(settings: TargetingSettings) -> (FireNetController, PulseRecord) {
        let (actuator, record) = RecordingActuator::new();
        let c = FireNetController::new(
            settings,
            Box::new(actuator),
            ArmSwitch::new(),
            FireLog::in_memory(16),
        );
        (c, record)
    }

    fn good_candidate() -> FireCandidate {
        FireCandidate {
            track_id: 1,
            confidence: 0.95,
            track_frames: 30,
            distance_m: 20.0,
            velocity_ms: 4.0,
        }
    }

    #[test]
    fn arming_refused_when_disabled() {
        let (c, _) = controller(TargetingSettings::default());
        assert_eq!(c.arm(), Err(RejectReason::NotEnabled));
        assert!(!c.is_armed());
    }

    #[test]
    fn unarmed_attempt_is_rejected_and_logged() {
        let (mut c, record) = controller(enabled());
        let outcome = c.attempt_fire(&good_candidate(), Instant::now(), 1);
        assert_eq!(
            outcome,
            FireOutcome::Rejected {
                reason: RejectReason::NotArmed
            }
        );
        assert_eq!(record.count(), 0);
        assert_eq!(c.fire_log().len(), 1);
    }

    #[test]
    fn armed_attempt_pulses_once_then_cools_down() {
        let (mut c, record) = controller(enabled());
        c.arm().expect("arm");
        let now = Instant::now();
        assert_eq!(c.attempt_fire(&good_candidate(), now, 1000), FireOutcome::Fired);
        assert_eq!(record.pulses(), vec![Duration::from_millis(100)]);
        assert_eq!(c.last_fire_ms(), Some(1000));

        let second = c.attempt_fire(&good_candidate(), now + Duration::from_secs(2), 3000);
        assert_eq!(
            second,
            FireOutcome::Rejected {
                reason: RejectReason::Cooldown
            }
        );
        assert_eq!(record.count(), 1);
        let later = c.attempt_fire(&good_candidate(), now + Duration::from_secs(11), 12_000);
        assert_eq!(later, FireOutcome::Fired);
        assert_eq!(record.count(), 2);
        assert_eq!(c.fire_log().len(), 3);
    }

    #[test]
    fn too_close_target_is_rejected_without_pulse() {
        let (mut c, record) = controller(enabled());
        c.arm().expect("arm");
        let candidate = FireCandidate {
            distance_m: 3.0,
            ..good_candidate()
        };
        let outcome = c.attempt_fire(&candidate, Instant::now(), 5);
        assert_eq!(
            outcome,
            FireOutcome::Rejected {
                reason: RejectReason::DistanceTooClose
            }
        );
        assert_eq!(record.count(), 0);
        let event = c.fire_log().last().expect("event");
        assert_eq!(event.distance_m, 3.0);
        assert_eq!(event.checklist.last().map(|r| r.check), Some("min_distance"));
    }

    #[test]
    fn failed_actuation_is_recorded_and_not_retried() {
        let (mut c, record) = controller(enabled());
        c.arm().expect("arm");
        record.fail_next();
        let now = Instant::now();
        let outcome = c.attempt_fire(&good_candidate(), now, 1);
        assert!(matches!(outcome, FireOutcome::ActuationFailed { .. }));
        assert_eq!(record.count(), 0);
        assert_eq!(
            c.attempt_fire(&good_candidate(), now + Duration::from_millis(33), 2),
            FireOutcome::Rejected {
                reason: RejectReason::Cooldown
            }
        );
    }

    #[test]
    fn shutdown_disarms_and_releases() {
        let (mut c, record) = controller(enabled());
        let arm = c.arm_switch();
        c.arm().expect("arm");
        c.shutdown();
        assert!(!arm.is_armed());
        assert!(record.released());
        let outcome = c.attempt_fire(&good_candidate(), Instant::now(), 1);
        assert_eq!(
            outcome,
            FireOutcome::Rejected {
                reason: RejectReason::NotArmed
            }
        );
    }
}
