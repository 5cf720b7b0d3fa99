use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use skywatch::config::{CameraType, Config, ConfigOverrides, TrackerType};
use skywatch::ConfigError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETECTOR_CONFIG",
        "CAMERA_TYPE",
        "TRACKER_TYPE",
        "CAPTURE_WIDTH",
        "CAPTURE_FPS",
        "TARGETING_FIRE_NET_MIN_DISTANCE_M",
        "TARGETING_FIRE_NET_MIN_TRACK_FRAMES",
        "STREAM_PORT",
        "LOG_LEVEL",
    ] {
        std::env::remove_var(key);
    }
}

fn temp_config(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn yaml_file_then_env_then_cli() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = temp_config(
        ".yaml",
        r#"
camera_type: mock
tracker_type: centroid
capture:
  width: 800
  height: 600
  fps: 25
targeting:
  fire_net_min_distance_m: 8.0
  fire_net_max_distance_m: 40.0
streaming:
  port: 9100
logging:
  level: debug
"#,
    );
    std::env::set_var("DETECTOR_CONFIG", file.path());
    std::env::set_var("CAPTURE_FPS", "15");
    std::env::set_var("TARGETING_FIRE_NET_MIN_DISTANCE_M", "6.5");
    std::env::set_var("STREAM_PORT", "9200");

    let overrides = ConfigOverrides {
        stream_port: Some(9300),
        ..ConfigOverrides::default()
    };
    let cfg = Config::load(None, &overrides).expect("load config");

    assert_eq!(cfg.camera_type, CameraType::Mock);
    assert_eq!(cfg.tracker_type, TrackerType::Centroid);
    assert_eq!(cfg.capture.width, 800);
    assert_eq!(cfg.capture.height, 600);
    assert_eq!(cfg.capture.fps, 15);
    assert!((cfg.targeting.fire_net_min_distance_m - 6.5).abs() < 1e-6);
    assert!((cfg.targeting.fire_net_max_distance_m - 40.0).abs() < 1e-6);
    assert_eq!(cfg.streaming.port, 9300);
    assert_eq!(cfg.logging.level, "debug");
    // Untouched sections keep their defaults.
    assert!((cfg.inference.nms_threshold - 0.45).abs() < 1e-6);

    clear_env();
}

#[test]
fn explicit_path_wins_over_env_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let env_file = temp_config(".yaml", "capture:\n  width: 320\n");
    let cli_file = temp_config(".json", r#"{"capture": {"width": 1024}}"#);
    std::env::set_var("DETECTOR_CONFIG", env_file.path());

    let cfg = Config::load(Some(cli_file.path()), &ConfigOverrides::default()).expect("load");
    assert_eq!(cfg.capture.width, 1024);

    clear_env();
}

#[test]
fn toml_files_are_accepted() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = temp_config(
        ".toml",
        "camera_type = \"mock\"\n[alert]\nconsole = false\nglobal_cooldown_seconds = 2.5\n",
    );
    let cfg = Config::load(Some(file.path()), &ConfigOverrides::default()).expect("load");
    assert_eq!(cfg.camera_type, CameraType::Mock);
    assert!(!cfg.alert.console);
    assert!((cfg.alert.global_cooldown_seconds - 2.5).abs() < 1e-6);

    clear_env();
}

#[test]
fn invalid_values_fail_before_startup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = temp_config(".yaml", "streaming:\n  quality: 0\n");
    let err = Config::load(Some(file.path()), &ConfigOverrides::default())
        .expect_err("quality 0 must be rejected");
    assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "streaming.quality"));

    std::env::set_var("CAPTURE_WIDTH", "wide");
    let err = Config::load(None, &ConfigOverrides::default()).expect_err("bad env value");
    assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "CAPTURE_WIDTH"));

    clear_env();
}

#[test]
fn out_of_range_durations_are_config_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (yaml, field) in [
        (
            "targeting:\n  fire_net_cooldown_seconds: 1.0e20\n",
            "targeting.fire_net_cooldown_seconds",
        ),
        (
            "targeting:\n  lock_timeout_seconds: 1.0e20\n",
            "targeting.lock_timeout_seconds",
        ),
        (
            "alert:\n  webhook_timeout_seconds: 1.0e20\n",
            "alert.webhook_timeout_seconds",
        ),
        (
            "alert:\n  cooldown_per_track_seconds: 1.0e30\n",
            "alert.cooldown_per_track_seconds",
        ),
        (
            "alert:\n  global_cooldown_seconds: -1.0\n",
            "alert.global_cooldown_seconds",
        ),
        (
            "streaming:\n  stale_after_seconds: 1.0e20\n",
            "streaming.stale_after_seconds",
        ),
    ] {
        let err = Config::from_yaml_str(yaml).expect_err(yaml);
        assert!(
            matches!(err, ConfigError::Invalid { field: ref f, .. } if f == field),
            "{yaml}: {err}"
        );
    }

    // A day is the longest accepted window, and its accessor is exact.
    let cfg = Config::from_yaml_str("targeting:\n  fire_net_cooldown_seconds: 86400.0\n")
        .expect("one day cooldown");
    assert_eq!(cfg.targeting.fire_cooldown().as_secs(), 86_400);
}

#[test]
fn loosened_safety_limits_refuse_startup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = temp_config(
        ".yaml",
        r#"
targeting:
  min_confidence_for_lock: 0.9
  fire_net_min_confidence: 0.0
  fire_net_min_track_frames: 0
  fire_net_cooldown_seconds: 0.0
  fire_net_min_distance_m: 0.0
"#,
    );
    let err = Config::load(Some(file.path()), &ConfigOverrides::default())
        .expect_err("loosened interlocks must not load");
    assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");

    // The same floor holds when it arrives through the environment.
    std::env::set_var("TARGETING_FIRE_NET_MIN_TRACK_FRAMES", "1");
    let err = Config::load(None, &ConfigOverrides::default()).expect_err("env floor");
    assert!(
        matches!(err, ConfigError::Invalid { ref field, .. } if field == "targeting.fire_net_min_track_frames")
    );

    clear_env();
}

#[test]
fn missing_file_is_a_read_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("tempdir");
    let err = Config::load(
        Some(&dir.path().join("absent.yaml")),
        &ConfigOverrides::default(),
    )
    .expect_err("missing file");
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn yaml_round_trip_is_stable() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut cfg = Config::default();
    cfg.camera_type = CameraType::Mock;
    cfg.capture.video_path = Some("clips/sky.mp4".to_string());
    cfg.targeting.fire_net_enabled = true;
    cfg.targeting.fire_log_path = Some("/var/lib/skywatch/fire.jsonl".to_string());
    cfg.streaming.auth_token = Some("viewer".to_string());
    cfg.alert.cooldown_per_track_seconds = 7.5;
    cfg.validate().expect("valid");

    let yaml = cfg.to_yaml().expect("to yaml");
    let reloaded = Config::from_yaml_str(&yaml).expect("reload");
    assert_eq!(reloaded, cfg);
    assert_eq!(reloaded.to_yaml().expect("to yaml again"), yaml);
}
