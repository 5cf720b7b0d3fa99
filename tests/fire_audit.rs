use anyhow::Result;
use std::path::Path;
use std::time::{Duration, Instant};

use skywatch::config::TargetingSettings;
use skywatch::targeting::{
    verify_chain, FireCandidate, FireLog, FireOutcome, PulseRecord, RecordingActuator,
    RejectReason,
};
use skywatch::{ArmSwitch, FireNetController};

fn settings() -> TargetingSettings {
    TargetingSettings {
        fire_net_enabled: true,
        ..TargetingSettings::default()
    }
}

fn controller(log_path: &Path) -> Result<(FireNetController, PulseRecord)> {
    let (actuator, pulses) = RecordingActuator::new();
    let controller = FireNetController::new(
        settings(),
        Box::new(actuator),
        ArmSwitch::new(),
        FireLog::with_file(log_path, 32)?,
    );
    Ok((controller, pulses))
}

fn candidate(distance_m: f32) -> FireCandidate {
    FireCandidate {
        track_id: 4,
        confidence: 0.95,
        track_frames: 20,
        distance_m,
        velocity_ms: 2.0,
    }
}

#[test]
fn every_decision_is_chained_and_survives_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fire.jsonl");
    let t0 = Instant::now();

    {
        let (mut fire, pulses) = controller(&path)?;
        fire.arm().map_err(|r| anyhow::anyhow!("arm refused: {r}"))?;
        // Too close: rejected, GPIO untouched.
        assert_eq!(
            fire.attempt_fire(&candidate(3.0), t0, 1_000),
            FireOutcome::Rejected {
                reason: RejectReason::DistanceTooClose
            }
        );
        assert_eq!(pulses.count(), 0);
        assert_eq!(fire.attempt_fire(&candidate(20.0), t0, 1_100), FireOutcome::Fired);
        assert_eq!(
            fire.attempt_fire(&candidate(20.0), t0 + Duration::from_secs(2), 3_100),
            FireOutcome::Rejected {
                reason: RejectReason::Cooldown
            }
        );
        assert_eq!(pulses.count(), 1);
        fire.shutdown();
        assert!(pulses.released());
        assert!(!fire.is_armed());
    }

    let summary = verify_chain(&path)?;
    assert_eq!(summary.entries, 3);

    // A restarted controller extends the same chain.
    {
        let (mut fire, _) = controller(&path)?;
        assert!(!fire.is_armed());
        assert_eq!(
            fire.attempt_fire(&candidate(20.0), Instant::now(), 9_000),
            FireOutcome::Rejected {
                reason: RejectReason::NotArmed
            }
        );
    }
    assert_eq!(verify_chain(&path)?.entries, 4);
    Ok(())
}

#[test]
fn rewritten_rejection_is_detected_and_blocks_startup() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fire.jsonl");
    {
        let (mut fire, _) = controller(&path)?;
        fire.attempt_fire(&candidate(20.0), Instant::now(), 1_000);
        fire.arm().map_err(|r| anyhow::anyhow!("arm refused: {r}"))?;
        fire.attempt_fire(&candidate(20.0), Instant::now(), 2_000);
    }
    verify_chain(&path)?;

    // Pretend the first, unarmed attempt had fired.
    let raw = std::fs::read_to_string(&path)?;
    let forged = raw.replacen(r#""result":"rejected""#, r#""result":"fired""#, 1);
    assert_ne!(raw, forged, "fixture must contain the rejection");
    std::fs::write(&path, forged)?;

    let err = verify_chain(&path).expect_err("forged entry must fail");
    assert!(format!("{err:#}").contains("line 1"));
    assert!(FireLog::with_file(&path, 32).is_err());
    Ok(())
}
