//! Drone alert fan-out.
//!
//! The pipeline hands every frame's tracks to an [`AlertDispatcher`], which
//! picks the drones matched this frame, applies the cooldowns and passes the
//! survivors to one [`AlertHandler`]. Several sinks are combined with
//! [`CompositeAlertHandler`].

mod console;
mod file;
mod throttle;
mod webhook;

use serde::Serialize;
use std::path::Path;
use std::time::Instant;

pub use console::ConsoleAlertHandler;
pub use file::FileAlertHandler;
pub use throttle::AlertThrottle;
pub use webhook::WebhookAlertHandler;

use crate::config::AlertSettings;
use crate::error::AlertError;
use crate::frame::FrameMeta;
use crate::track::TrackedObject;

/// One drone sighting as delivered to sinks.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    pub track_id: u64,
    pub confidence: f32,
    pub score: f32,
    /// `[x, y, w, h]` in pixels.
    pub bbox: [f32; 4],
    pub class_id: u32,
    /// Frame capture time, ms since the Unix epoch.
    pub timestamp: u64,
    pub frame_sequence: u64,
}

impl Alert {
    pub fn from_track(track: &TrackedObject, meta: &FrameMeta) -> Self {
        let det = &track.detection.detection;
        Self {
            track_id: track.track_id,
            confidence: det.confidence,
            score: track.score(),
            bbox: det.bbox(),
            class_id: det.class_id,
            timestamp: meta.timestamp_ms,
            frame_sequence: meta.sequence,
        }
    }
}

pub trait AlertHandler: Send {
    fn name(&self) -> &'static str;

    /// Deliver or enqueue one alert. `Ok(false)` means the sink accepted the
    /// call but did nothing with it.
    fn send_alert(&mut self, alert: &Alert) -> Result<bool, AlertError>;

    fn flush(&mut self) -> Result<(), AlertError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Default)]
pub struct NullAlertHandler;

impl AlertHandler for NullAlertHandler {
    fn name(&self) -> &'static str {
        "null"
    }

    fn send_alert(&mut self, _alert: &Alert) -> Result<bool, AlertError> {
        Ok(false)
    }
}

/// Sends to every inner handler, even after one fails.
#[derive(Default)]
pub struct CompositeAlertHandler {
    handlers: Vec<Box<dyn AlertHandler>>,
}

impl CompositeAlertHandler {
    pub fn new(handlers: Vec<Box<dyn AlertHandler>>) -> Self {
        Self { handlers }
    }

    pub fn push(&mut self, handler: Box<dyn AlertHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

impl AlertHandler for CompositeAlertHandler {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn send_alert(&mut self, alert: &Alert) -> Result<bool, AlertError> {
        let mut delivered = false;
        let mut failures = Vec::new();
        for handler in &mut self.handlers {
            match handler.send_alert(alert) {
                Ok(sent) => delivered |= sent,
                Err(e) => failures.push(format!("{}: {e}", handler.name())),
            }
        }
        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(AlertError::Composite(failures))
        }
    }

    fn flush(&mut self) -> Result<(), AlertError> {
        let failures: Vec<String> = self
            .handlers
            .iter_mut()
            .filter_map(|h| h.flush().err().map(|e| format!("{}: {e}", h.name())))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AlertError::Composite(failures))
        }
    }
}

/// Build the sink set described by the settings.
pub fn handler_from_settings(settings: &AlertSettings) -> Result<Box<dyn AlertHandler>, AlertError> {
    let mut composite = CompositeAlertHandler::default();
    if settings.console {
        composite.push(Box::new(ConsoleAlertHandler));
    }
    if let Some(url) = settings.webhook_url.as_deref() {
        composite.push(Box::new(WebhookAlertHandler::new(
            url,
            settings.webhook_timeout(),
            settings.webhook_retry_count,
            settings.webhook_queue_size,
        )?));
    }
    if let Some(path) = settings.file_path.as_deref() {
        composite.push(Box::new(FileAlertHandler::open(
            Path::new(path),
            settings.file_buffer_size,
        )?));
    }
    log::info!("alert sinks: {:?}", composite.names());
    if composite.is_empty() {
        return Ok(Box::new(NullAlertHandler));
    }
    Ok(Box::new(composite))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AlertStats {
    pub sent: u64,
    pub suppressed: u64,
    pub failed: u64,
}

/// Selects, throttles and delivers alerts for each frame.
pub struct AlertDispatcher {
    handler: Box<dyn AlertHandler>,
    throttle: AlertThrottle,
    stats: AlertStats,
}

impl AlertDispatcher {
    pub fn new(handler: Box<dyn AlertHandler>, throttle: AlertThrottle) -> Self {
        Self {
            handler,
            throttle,
            stats: AlertStats::default(),
        }
    }

    pub fn from_settings(settings: &AlertSettings) -> Result<Self, AlertError> {
        Ok(Self::new(
            handler_from_settings(settings)?,
            AlertThrottle::new(
                settings.per_track_cooldown(),
                settings.global_cooldown(),
            ),
        ))
    }

    pub fn stats(&self) -> AlertStats {
        self.stats
    }

    /// Alert on drones matched this frame. Returns how many alerts were sent.
    pub fn process(&mut self, tracks: &[TrackedObject], meta: &FrameMeta, now: Instant) -> usize {
        self.throttle.prune(tracks.iter().map(|t| t.track_id));
        let mut sent = 0;
        for track in tracks.iter().filter(|t| t.seen_this_frame() && t.is_drone()) {
            if !self.throttle.allow(track.track_id, now) {
                self.stats.suppressed += 1;
                continue;
            }
            match self.handler.send_alert(&Alert::from_track(track, meta)) {
                Ok(_) => {
                    self.stats.sent += 1;
                    sent += 1;
                }
                Err(e) => {
                    self.stats.failed += 1;
                    log::warn!("alert for track {} failed: {e}", track.track_id);
                }
            }
        }
        sent
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.handler.flush() {
            log::warn!("alert flush failed: {e}");
        }
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
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<u64>>>,
        fail: bool,
    }

    impl AlertHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn send_alert(&mut self, alert: &Alert) -> Result<bool, AlertError> {
            if self.fail {
                return Err(AlertError::Delivery {
                    sink: "recorder".into(),
                    reason: "down".into(),
                });
            }
            self.seen.lock().expect("lock").push(alert.track_id);
            Ok(true)
        }
    }

    fn track(id: u64, is_drone: bool, frames_since_seen: u32) -> TrackedObject {
        TrackedObject {
            track_id: id,
            detection: ScoredDetection {
                detection: Detection::new(10.0, 20.0, 30.0, 30.0, 0, 0.9),
                score: DroneScore {
                    value: if is_drone { 0.8 } else { 0.2 },
                    is_drone,
                },
            },
            state: TrackState::Matched,
            frames_seen: 3,
            frames_since_seen,
            velocity: (0.0, 0.0),
            predicted: None,
        }
    }

    fn meta() -> FrameMeta {
        FrameMeta {
            sequence: 7,
            timestamp_ms: 1_234,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn composite_tries_every_sink() {
        let good = Recorder::default();
        let seen = good.seen.clone();
        let bad = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut composite = CompositeAlertHandler::new(vec![Box::new(bad), Box::new(good)]);
        let alert = Alert::from_track(&track(4, true, 0), &meta());
        match composite.send_alert(&alert) {
            Err(AlertError::Composite(failures)) => assert_eq!(failures.len(), 1),
            other => panic!("expected composite failure, got {other:?}"),
        }
        assert_eq!(*seen.lock().expect("lock"), vec![4]);
    }

    #[test]
    fn dispatcher_alerts_only_drones_seen_this_frame() {
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();
        let mut dispatcher = AlertDispatcher::new(
            Box::new(recorder),
            AlertThrottle::new(Duration::ZERO, Duration::ZERO),
        );
        let tracks = [track(1, true, 0), track(2, false, 0), track(3, true, 2)];
        assert_eq!(dispatcher.process(&tracks, &meta(), Instant::now()), 1);
        assert_eq!(*seen.lock().expect("lock"), vec![1]);
    }

    #[test]
    fn dispatcher_applies_cooldowns() {
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();
        let mut dispatcher = AlertDispatcher::new(
            Box::new(recorder),
            AlertThrottle::new(Duration::from_secs(5), Duration::from_secs(1)),
        );
        let start = Instant::now();
        let tracks = [track(1, true, 0), track(2, true, 0)];
        dispatcher.process(&tracks, &meta(), start);
        dispatcher.process(&tracks, &meta(), start + Duration::from_millis(1_500));
        dispatcher.process(&tracks, &meta(), start + Duration::from_millis(5_100));
        assert_eq!(*seen.lock().expect("lock"), vec![1, 2, 1]);
        assert!(dispatcher.stats().suppressed >= 3);
    }

    #[test]
    fn alert_carries_frame_and_box() {
        let alert = Alert::from_track(&track(9, true, 0), &meta());
        assert_eq!(alert.bbox, [10.0, 20.0, 30.0, 30.0]);
        assert_eq!(alert.timestamp, 1_234);
        assert_eq!(alert.frame_sequence, 7);
        assert!((alert.score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn settings_without_sinks_build_null_handler() {
        let settings = AlertSettings {
            console: false,
            ..AlertSettings::default()
        };
        let handler = handler_from_settings(&settings).expect("handler");
        assert_eq!(handler.name(), "null");
    }
}
