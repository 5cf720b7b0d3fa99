//! Detection pipeline orchestration.
//!
//! [`DetectionPipeline`] owns every piece of cross-frame state: the tracker,
//! the targeting system with its lock and fire cooldown, and the alert
//! throttle. Each frame goes through detect, score, track, target, alert and
//! render strictly in that order. The capture thread and the streaming
//! clients only meet the pipeline through single-slot buffers.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alert::AlertDispatcher;
use crate::capture::{spawn_capture, CaptureOptions, CaptureSlot};
use crate::config::Config;
use crate::detect::InferenceEngine;
use crate::frame::{Frame, FrameMeta};
use crate::hardware::HardwareProbe;
use crate::ingest::FrameSource;
use crate::render::{FrameRenderer, RenderContext};
use crate::score::score_all;
use crate::stream::{
    FrameSlot, PipelineState, PipelineStatus, PublishedFrame, SlotRead, StatusBoard,
    StreamingServer,
};
use crate::targeting::{
    ArmSwitch, FireOutcome, LockState, RejectReason, TargetingStatus, TargetingSystem,
};
use crate::track::{ObjectTracker, TrackedObject};

const FRAME_POLL: Duration = Duration::from_millis(100);
const FPS_SMOOTHING: f32 = 0.1;

/// Exponential moving average of the processing rate.
#[derive(Debug, Default)]
struct FpsMeter {
    last: Option<Instant>,
    fps: f32,
}

impl FpsMeter {
    fn tick(&mut self, now: Instant) -> f32 {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f32();
            if dt > 0.0 {
                let instant = 1.0 / dt;
                self.fps = if self.fps == 0.0 {
                    instant
                } else {
                    self.fps + FPS_SMOOTHING * (instant - self.fps)
                };
            }
        }
        self.last = Some(now);
        self.fps
    }
}

/// What one pipeline iteration produced.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub meta: FrameMeta,
    pub detections: usize,
    pub tracks: Vec<TrackedObject>,
    pub targeting: TargetingStatus,
    pub alerts_sent: usize,
}

impl FrameReport {
    pub fn drones(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.seen_this_frame() && t.is_drone())
            .count()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub fire_attempts: usize,
    pub alerts_sent: u64,
}

pub struct DetectionPipeline {
    config: Config,
    engine: InferenceEngine,
    tracker: ObjectTracker,
    targeting: TargetingSystem,
    alerts: AlertDispatcher,
    renderer: FrameRenderer,
    published: Arc<FrameSlot>,
    status: Arc<StatusBoard>,
    fps: FpsMeter,
    frames_processed: u64,
    detections_total: u64,
    drone_detections_total: u64,
    fire_attempts: u64,
    shots_fired: u64,
    last_frame: Option<Frame>,
    source_name: &'static str,
}

impl DetectionPipeline {
    pub fn new(
        config: Config,
        engine: InferenceEngine,
        tracker: ObjectTracker,
        targeting: TargetingSystem,
        alerts: AlertDispatcher,
    ) -> Self {
        let renderer = FrameRenderer::from_settings(&config.display);
        let status = StatusBoard::new(PipelineStatus {
            engine: engine.name().to_string(),
            tracker: tracker.name().to_string(),
            armed: targeting.fire().is_armed(),
            ..PipelineStatus::default()
        });
        Self {
            config,
            engine,
            tracker,
            targeting,
            alerts,
            renderer,
            published: Arc::new(FrameSlot::new()),
            status: Arc::new(status),
            fps: FpsMeter::default(),
            frames_processed: 0,
            detections_total: 0,
            drone_detections_total: 0,
            fire_attempts: 0,
            shots_fired: 0,
            last_frame: None,
            source_name: "none",
        }
    }

    /// Resolve `auto` selections, build every component and open the source.
    ///
    /// Any failure here is fatal: a bad model, an unopenable camera or an
    /// unreachable alert sink stops startup before the first frame.
    pub fn build(
        config: Config,
        probe: &HardwareProbe,
        arm: ArmSwitch,
    ) -> Result<(Self, FrameSource)> {
        let camera = probe.resolve_camera(&config);
        let engine_type = probe.resolve_engine(&config);

        let mut source = FrameSource::from_settings(camera, &config.capture)?;
        source
            .open()
            .with_context(|| format!("opening {} frame source", source.name()))?;

        let mut engine = InferenceEngine::from_settings(engine_type, &config.inference)?;
        engine.warm_up().context("warming up inference engine")?;

        let tracker = ObjectTracker::from_settings(config.tracker_type, &config.tracker);
        let targeting = TargetingSystem::from_settings(&config.targeting, arm)?;
        let alerts = AlertDispatcher::from_settings(&config.alert)?;

        log::info!(
            "pipeline: source={} engine={} tracker={} actuator={} fire_enabled={}",
            source.name(),
            engine.name(),
            tracker.name(),
            targeting.fire().actuator_name(),
            config.targeting.fire_net_enabled
        );
        let mut pipeline = Self::new(config, engine, tracker, targeting, alerts);
        pipeline.source_name = source.name();
        pipeline.status.update(|s| s.source = source.name().to_string());
        Ok((pipeline, source))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status_board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.status)
    }

    pub fn published_frames(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.published)
    }

    pub fn targeting(&self) -> &TargetingSystem {
        &self.targeting
    }

    /// Operator arming. Refused while the net launcher is disabled.
    pub fn arm(&self) -> Result<(), RejectReason> {
        self.targeting.fire().arm()?;
        self.status.update(|s| s.armed = true);
        log::warn!("net launcher ARMED");
        Ok(())
    }

    pub fn disarm(&self) {
        self.targeting.fire().disarm();
        self.status.update(|s| s.armed = false);
    }

    /// Operator fire request against the current lock.
    pub fn request_fire(&mut self, now: Instant) -> Option<FireOutcome> {
        let timestamp_ms = self.last_frame.as_ref().map(Frame::timestamp_ms)?;
        let outcome = self.targeting.request_fire(now, timestamp_ms);
        self.count_fire(outcome.as_ref());
        let last_fire = self.targeting.fire().last_fire_ms();
        let (attempts, fired) = (self.fire_attempts, self.shots_fired);
        self.status.update(|s| {
            s.last_fire_ts = last_fire;
            s.fire_attempts = attempts;
            s.shots_fired = fired;
        });
        outcome
    }

    fn count_fire(&mut self, outcome: Option<&FireOutcome>) {
        if let Some(outcome) = outcome {
            self.fire_attempts += 1;
            if outcome.fired() {
                self.shots_fired += 1;
            }
        }
    }

    /// Run one frame through the whole chain and publish the rendered result.
    pub fn process_frame(&mut self, frame: Frame, now: Instant) -> FrameReport {
        let meta = frame.meta();
        let detections = self.engine.detect(&frame);
        let scored = score_all(&detections, &self.config.drone_score);
        let tracks = self.tracker.update(&scored);
        let targeting = self.targeting.update(&tracks, &meta, now);
        self.count_fire(targeting.last_outcome.as_ref());
        let alerts_sent = self.alerts.process(&tracks, &meta, now);
        let fps = self.fps.tick(now);

        let ctx = RenderContext {
            tracks: &tracks,
            targeting: &targeting,
            fps,
            no_signal: false,
        };
        let image = self.renderer.render(&frame, &ctx);
        self.published
            .publish(PublishedFrame::new(image, meta.sequence, meta.timestamp_ms));

        self.frames_processed += 1;
        self.detections_total += detections.len() as u64;
        self.drone_detections_total += scored.iter().filter(|d| d.score.is_drone).count() as u64;
        let report = FrameReport {
            meta,
            detections: detections.len(),
            tracks,
            targeting,
            alerts_sent,
        };
        self.update_status(&report, fps);
        self.last_frame = Some(frame);
        report
    }

    fn update_status(&self, report: &FrameReport, fps: f32) {
        let frames_processed = self.frames_processed;
        let alerts = self.alerts.stats();
        let drones = report.drones();
        let inference_failures = self.engine.failures();
        let fire_log = self.targeting.fire().fire_log();
        let (log_failures, log_degraded) = (fire_log.write_failures(), !fire_log.is_writable());
        self.status.update(|s| {
            s.status = PipelineState::Running;
            s.active_tracks = report.tracks.len();
            s.drones = drones;
            s.fps = fps;
            s.armed = report.targeting.armed;
            s.last_fire_ts = report.targeting.last_fire_ms;
            s.lock = report.targeting.lock.state;
            s.lock_track_id = report.targeting.lock.track_id;
            s.target_distance_m = report
                .targeting
                .target
                .map(|t| t.distance_m)
                .filter(|d| d.is_finite());
            s.frames_processed = frames_processed;
            s.last_frame_sequence = Some(report.meta.sequence);
            s.alerts_sent = alerts.sent;
            s.alerts_suppressed = alerts.suppressed;
            s.alerts_failed = alerts.failed;
            s.detections_total = self.detections_total;
            s.drone_detections_total = self.drone_detections_total;
            s.inference_failures = inference_failures;
            s.fire_attempts = self.fire_attempts;
            s.shots_fired = self.shots_fired;
            s.fire_log_write_failures = log_failures;
            s.fire_log_degraded = log_degraded;
        });
    }

    /// Release any lock, re-render the last frame under a NO SIGNAL banner
    /// and flag the status. The arm state is left alone.
    fn enter_no_signal(&mut self, now: Instant) {
        log::error!("ALERT: no signal from {} frame source", self.source_name);
        self.targeting.release_lock();
        self.status.update(|s| {
            s.status = PipelineState::NoSignal;
            s.lock = LockState::Unlocked;
            s.lock_track_id = None;
            s.target_distance_m = None;
        });
        let Some(frame) = self.last_frame.as_ref() else {
            return;
        };
        let targeting = self.targeting.status(now, None);
        let ctx = RenderContext {
            tracks: &[],
            targeting: &targeting,
            fps: 0.0,
            no_signal: true,
        };
        let image = self.renderer.render(frame, &ctx);
        self.published.publish(PublishedFrame::new(
            image,
            frame.sequence(),
            frame.timestamp_ms(),
        ));
    }

    /// Drive the pipeline from `source` until `stop` is set or the source ends.
    ///
    /// Starts the capture thread and, when enabled, the streaming server.
    /// Shutdown runs on every exit path after startup succeeded.
    pub fn run(mut self, source: FrameSource, stop: Arc<AtomicBool>) -> Result<RunSummary> {
        let stream = if self.config.streaming.enabled {
            let server = StreamingServer::new(
                self.config.streaming.clone(),
                self.published_frames(),
                self.status_board(),
            );
            Some(server.spawn().context("starting streaming server")?)
        } else {
            None
        };

        let frames = Arc::new(CaptureSlot::new());
        let options = CaptureOptions {
            read_timeout: self.config.capture.read_timeout(),
            max_consecutive_misses: self.config.capture.max_consecutive_misses,
        };
        let capture = spawn_capture(source, options, Arc::clone(&frames), Arc::clone(&stop))?;
        let signal = capture.signal();

        let mut summary = RunSummary::default();
        let mut no_signal = false;
        while !stop.load(Ordering::SeqCst) {
            match frames.take(FRAME_POLL) {
                SlotRead::Value { value, .. } => {
                    no_signal = false;
                    self.process_frame(value, Instant::now());
                }
                SlotRead::Timeout => {
                    if signal.no_signal() && !no_signal {
                        no_signal = true;
                        self.enter_no_signal(Instant::now());
                    }
                }
                SlotRead::Closed => break,
            }
            let (read, missed) = (signal.frames(), signal.misses());
            self.status.update(|s| {
                s.capture_frames = read;
                s.capture_misses = missed;
            });
        }
        if signal.finished() {
            log::info!("frame source finished after {} frames", signal.frames());
        }

        stop.store(true, Ordering::SeqCst);
        let capture_result = capture.join();
        summary.frames_processed = self.frames_processed;
        summary.fire_attempts = self.fire_attempts as usize;
        summary.alerts_sent = self.alerts.stats().sent;
        self.shutdown();
        if let Some(stream) = stream {
            stream.stop()?;
        }
        capture_result?;
        Ok(summary)
    }

    /// Flush alerts, release the lock, disarm and de-assert the actuator.
    pub fn shutdown(&mut self) {
        self.alerts.flush();
        self.targeting.shutdown();
        self.published.close();
        self.status.update(|s| {
            s.status = PipelineState::Stopped;
            s.armed = false;
            s.lock = LockState::Unlocked;
            s.lock_track_id = None;
        });
        let stats = self.alerts.stats();
        log::info!(
            "pipeline stopped: {} frames, {} alerts sent, {} suppressed, {} failed",
            self.frames_processed,
            stats.sent,
            stats.suppressed,
            stats.failed
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
