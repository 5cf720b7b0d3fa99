//! Prometheus text exposition of the pipeline counters, served on `/metrics`.

use std::fmt::Write;

use super::{PipelineState, PipelineStatus};
use crate::targeting::LockState;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone, Copy)]
enum Kind {
    Counter,
    Gauge,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

struct Exposition {
    out: String,
}

impl Exposition {
    fn metric(&mut self, name: &str, kind: Kind, help: &str, value: impl Into<f64>) {
        let value: f64 = value.into();
        // Writing into a String cannot fail.
        let _ = writeln!(self.out, "# HELP {name} {help}");
        let _ = writeln!(self.out, "# TYPE {name} {}", kind.as_str());
        let _ = writeln!(self.out, "{name} {value}");
    }

    fn counter(&mut self, name: &str, help: &str, value: u64) {
        self.metric(name, Kind::Counter, help, value as f64);
    }

    fn gauge(&mut self, name: &str, help: &str, value: impl Into<f64>) {
        self.metric(name, Kind::Gauge, help, value);
    }
}

/// Numeric code of a lock state for the `detector_target_state` gauge.
fn lock_code(state: LockState) -> u8 {
    match state {
        LockState::Unlocked => 0,
        LockState::Acquiring => 1,
        LockState::Locked => 2,
        LockState::Engaged => 3,
        LockState::Expired => 4,
    }
}

pub fn render(status: &PipelineStatus, stream_clients: usize) -> String {
    let mut m = Exposition {
        out: String::with_capacity(2048),
    };
    m.counter(
        "detector_frames_processed_total",
        "Frames run through detection, tracking and targeting",
        status.frames_processed,
    );
    m.counter(
        "detector_frames_captured_total",
        "Frames read from the frame source",
        status.capture_frames,
    );
    m.counter(
        "detector_frames_dropped_total",
        "Captured frames replaced before the pipeline took them",
        status.capture_frames.saturating_sub(status.frames_processed),
    );
    m.counter(
        "detector_capture_misses_total",
        "Frame source reads that returned no frame",
        status.capture_misses,
    );
    m.counter(
        "detector_inference_failures_total",
        "Frames whose inference failed and counted as empty",
        status.inference_failures,
    );
    m.counter(
        "detector_detections_total",
        "Detections after confidence filtering and NMS",
        status.detections_total,
    );
    m.counter(
        "detector_drone_detections_total",
        "Detections scored as drones",
        status.drone_detections_total,
    );
    m.gauge(
        "detector_active_tracks",
        "Tracks currently held by the tracker",
        status.active_tracks as f64,
    );
    m.counter("detector_alerts_sent_total", "Alerts delivered", status.alerts_sent);
    m.counter(
        "detector_alerts_suppressed_total",
        "Alerts held back by the cooldowns",
        status.alerts_suppressed,
    );
    m.counter(
        "detector_alerts_failed_total",
        "Alerts every sink failed to deliver",
        status.alerts_failed,
    );
    m.counter(
        "detector_engagements_total",
        "Fire attempts, fired or rejected",
        status.fire_attempts,
    );
    m.counter("detector_shots_fired_total", "Net launcher pulses", status.shots_fired);
    m.counter(
        "detector_fire_log_write_failures_total",
        "Fire attempts that could not be appended to the fire log",
        status.fire_log_write_failures,
    );
    m.gauge(
        "detector_fire_log_degraded",
        "1 when the fire log can no longer be extended",
        u8::from(status.fire_log_degraded),
    );
    m.gauge(
        "detector_target_state",
        "Lock state (0=unlocked, 1=acquiring, 2=locked, 3=engaged, 4=expired)",
        lock_code(status.lock),
    );
    m.gauge(
        "detector_armed",
        "1 while the net launcher is armed",
        u8::from(status.armed),
    );
    m.gauge("detector_fps_current", "Smoothed processing rate", status.fps);
    m.gauge(
        "detector_running",
        "1 while the pipeline is processing fresh frames",
        u8::from(status.status == PipelineState::Running),
    );
    m.gauge(
        "detector_stream_clients",
        "Connected streaming clients",
        stream_clients as f64,
    );
    m.out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(text: &str, name: &str) -> Option<f64> {
        text.lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(' ')?.parse().ok())
    }

    #[test]
    fn counters_and_gauges_are_exposed() {
        let status = PipelineStatus {
            status: PipelineState::Running,
            frames_processed: 90,
            capture_frames: 100,
            shots_fired: 1,
            fire_attempts: 4,
            lock: LockState::Locked,
            armed: true,
            fps: 29.5,
            ..PipelineStatus::default()
        };
        let text = render(&status, 3);
        assert_eq!(sample(&text, "detector_frames_processed_total"), Some(90.0));
        assert_eq!(sample(&text, "detector_frames_dropped_total"), Some(10.0));
        assert_eq!(sample(&text, "detector_engagements_total"), Some(4.0));
        assert_eq!(sample(&text, "detector_target_state"), Some(2.0));
        assert_eq!(sample(&text, "detector_armed"), Some(1.0));
        assert_eq!(sample(&text, "detector_running"), Some(1.0));
        assert_eq!(sample(&text, "detector_stream_clients"), Some(3.0));
        assert_eq!(sample(&text, "detector_fps_current"), Some(29.5));
        assert!(text.contains("# TYPE detector_shots_fired_total counter"));
        assert!(text.contains("# TYPE detector_active_tracks gauge"));
    }

    #[test]
    fn every_sample_has_help_and_type() {
        let text = render(&PipelineStatus::default(), 0);
        let samples = text.lines().filter(|l| !l.starts_with('#')).count();
        let helps = text.lines().filter(|l| l.starts_with("# HELP")).count();
        let types = text.lines().filter(|l| l.starts_with("# TYPE")).count();
        assert_eq!(samples, helps);
        assert_eq!(samples, types);
    }
}
