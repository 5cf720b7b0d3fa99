use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use skywatch::alert::{AlertDispatcher, AlertThrottle, FileAlertHandler};
use skywatch::config::{CameraType, Config, EngineType, TrackerType};
use skywatch::ingest::{MockConfig, MockSource};
use skywatch::stream::PipelineState;
use skywatch::targeting::{verify_chain, FireLog, RecordingActuator};
use skywatch::{
    ArmSwitch, DetectionPipeline, FireNetController, FrameSource, HardwareProbe, InferenceEngine,
    ObjectTracker, TargetingSystem,
};

fn mock_source(max_frames: u64) -> FrameSource {
    let mut source = FrameSource::Mock(MockSource::new(MockConfig {
        width: 640,
        height: 480,
        fps: 30,
        max_frames,
        ..MockConfig::default()
    }));
    source.open().expect("open mock source");
    source
}

fn read_jsonl(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .expect("read file")
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect()
}

#[test]
fn mock_run_ends_with_source_and_reports_stopped() {
    let mut config = Config::default();
    config.camera_type = CameraType::Mock;
    config.engine_type = EngineType::Mock;
    config.capture.mock_max_frames = 20;
    config.streaming.host = "127.0.0.1".to_string();
    config.streaming.port = 0;
    config.display.headless = true;
    config.alert.console = false;

    let (pipeline, source) =
        DetectionPipeline::build(config, &HardwareProbe::default(), ArmSwitch::new())
            .expect("build");
    let status = pipeline.status_board();
    let published = pipeline.published_frames();
    assert_eq!(status.snapshot().source, "mock");

    let summary = pipeline
        .run(source, Arc::new(AtomicBool::new(false)))
        .expect("run");

    assert!(summary.frames_processed > 0 && summary.frames_processed <= 20);
    assert_eq!(summary.fire_attempts, 0);
    let snapshot = status.snapshot();
    assert_eq!(snapshot.status, PipelineState::Stopped);
    assert!(!snapshot.armed);
    assert_eq!(snapshot.frames_processed, summary.frames_processed);
    assert!(published.is_closed());
}

#[test]
fn locked_mock_drone_is_engaged_once_and_audited() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fire_log_path = dir.path().join("fire.jsonl");
    let alerts_path = dir.path().join("alerts.jsonl");

    let mut config = Config::default();
    config.streaming.enabled = false;
    config.display.headless = true;
    config.tracker_type = TrackerType::Kalman;
    // Score the mock detections by raw confidence (0.85).
    config.drone_score.model_weight = 1.0;
    let t = &mut config.targeting;
    // The mock target is a 100 px box; a 2 m drone puts it at ~10.6 m.
    t.assumed_drone_size_m = 2.0;
    t.min_confidence_for_lock = 0.7;
    t.fire_net_min_confidence = 0.8;
    t.fire_net_min_track_frames = 5;
    t.fire_net_enabled = true;
    t.auto_engage = true;
    config.validate().expect("valid config");

    let engine =
        InferenceEngine::from_settings(EngineType::Mock, &config.inference).expect("engine");
    let tracker = ObjectTracker::from_settings(config.tracker_type, &config.tracker);
    let (actuator, pulses) = RecordingActuator::new();
    let fire = FireNetController::new(
        config.targeting.clone(),
        Box::new(actuator),
        ArmSwitch::new(),
        FireLog::with_file(&fire_log_path, 64).expect("fire log"),
    );
    let targeting = TargetingSystem::new(config.targeting.clone(), fire);
    let alerts = AlertDispatcher::new(
        Box::new(FileAlertHandler::open(&alerts_path, 1).expect("alert file")),
        AlertThrottle::new(Duration::from_secs(60), Duration::ZERO),
    );
    let pipeline = DetectionPipeline::new(config, engine, tracker, targeting, alerts);
    pipeline.arm().expect("arm");

    let summary = pipeline
        .run(mock_source(45), Arc::new(AtomicBool::new(false)))
        .expect("run");

    assert_eq!(pulses.count(), 1, "exactly one pulse inside the cooldown window");
    assert!(pulses.released());
    assert!(summary.fire_attempts >= 1);

    let chain = verify_chain(&fire_log_path).expect("fire log verifies");
    assert_eq!(chain.entries as usize, summary.fire_attempts);
    let events = read_jsonl(&fire_log_path);
    let outcomes: Vec<&str> = events
        .iter()
        .map(|r| r["event"]["outcome"]["result"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(outcomes.iter().filter(|o| **o == "fired").count(), 1);
    for (record, outcome) in events.iter().zip(&outcomes) {
        if *outcome == "rejected" {
            assert_eq!(record["event"]["outcome"]["reason"], "cooldown");
        }
    }
    let fired = &events[outcomes.iter().position(|o| *o == "fired").expect("fired")];
    let distance = fired["event"]["distance_m"].as_f64().expect("distance");
    assert!((10.0..11.0).contains(&distance), "distance {distance}");

    // One alert for the single mock drone track, then the per-track cooldown.
    let alerts = read_jsonl(&alerts_path);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["track_id"], 1);
}
