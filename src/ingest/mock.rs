//! Synthetic frame source.
//!
//! Renders a sky gradient with one dark object moving along [`mock_target_box`].
//! The mock inference backend reports the same trajectory, so a mock pipeline
//! produces a coherent track without a camera or a model.

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::SourceStats;
use crate::frame::Frame;

const TARGET_SIZE: u32 = 100;
const TARGET_STEP_PX: u64 = 5;

/// Bounding box `(x, y, w, h)` of the synthetic target for a frame sequence number.
pub fn mock_target_box(sequence: u64, width: u32, height: u32) -> (f32, f32, f32, f32) {
    let span = u64::from(width.saturating_sub(TARGET_SIZE).max(1));
    let x = (sequence * TARGET_STEP_PX) % span;
    let y = (height / 2).saturating_sub(TARGET_SIZE / 2);
    (
        x as f32,
        y as f32,
        TARGET_SIZE.min(width) as f32,
        TARGET_SIZE.min(height) as f32,
    )
}

#[derive(Clone, Debug)]
pub struct MockConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// End of stream after this many frames; 0 runs forever.
    pub max_frames: u64,
    pub seed: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            max_frames: 0,
            seed: 7,
        }
    }
}

pub struct MockSource {
    config: MockConfig,
    background: RgbImage,
    rng: StdRng,
    sequence: u64,
    interval: Duration,
    next_due: Option<Instant>,
    open: bool,
}

impl MockSource {
    pub fn new(config: MockConfig) -> Self {
        let background = sky_gradient(config.width, config.height);
        Self {
            interval: Duration::from_secs_f64(1.0 / config.fps.max(1) as f64),
            rng: StdRng::seed_from_u64(config.seed),
            background,
            config,
            sequence: 0,
            next_due: None,
            open: false,
        }
    }

    pub(crate) fn open(&mut self) {
        self.open = true;
        self.next_due = Some(Instant::now());
        log::info!(
            "MockSource: opened {}x{} @ {} fps",
            self.config.width,
            self.config.height,
            self.config.fps
        );
    }

    pub(crate) fn read(&mut self, timeout: Duration) -> Option<Frame> {
        if !self.open {
            return None;
        }
        if self.config.max_frames > 0 && self.sequence >= self.config.max_frames {
            return None;
        }
        if let Some(due) = self.next_due {
            let wait = due.saturating_duration_since(Instant::now());
            if wait > timeout {
                std::thread::sleep(timeout);
                return None;
            }
            std::thread::sleep(wait);
        }
        self.next_due = Some(Instant::now() + self.interval);

        let sequence = self.sequence;
        self.sequence += 1;
        Some(Frame::from_image(self.render(sequence), sequence))
    }

    pub(crate) fn close(&mut self) {
        if self.open {
            log::info!("MockSource: closed after {} frames", self.sequence);
        }
        self.open = false;
    }

    pub(crate) fn resolution(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.open
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.config.max_frames > 0 && self.sequence >= self.config.max_frames
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.sequence,
            source: "mock".to_string(),
        }
    }

    fn render(&mut self, sequence: u64) -> RgbImage {
        let mut img = self.background.clone();
        let (x, y, w, h) = mock_target_box(sequence, self.config.width, self.config.height);
        let (x, y, w, h) = (x as u32, y as u32, w as u32, h as u32);

        // Quadcopter silhouette: body plus four rotor arms.
        let cx = x + w / 2;
        let cy = y + h / 2;
        let body = Rgb([30, 30, 36]);
        for py in y..(y + h).min(img.height()) {
            for px in x..(x + w).min(img.width()) {
                let dx = px.abs_diff(cx);
                let dy = py.abs_diff(cy);
                let in_body = dx < w / 6 && dy < h / 8;
                let on_arm = dx.abs_diff(dy) < 4 && dx < (w / 2).saturating_sub(8);
                let on_rotor = dx > w / 3 && dy > h / 3;
                if in_body || on_arm || on_rotor {
                    img.put_pixel(px, py, body);
                }
            }
        }

        // Sensor noise.
        for _ in 0..64 {
            let px = self.rng.gen_range(0..img.width());
            let py = self.rng.gen_range(0..img.height());
            let jitter: u8 = self.rng.gen_range(0..24);
            let Rgb([r, g, b]) = *img.get_pixel(px, py);
            img.put_pixel(
                px,
                py,
                Rgb([
                    r.saturating_add(jitter),
                    g.saturating_add(jitter),
                    b.saturating_add(jitter),
                ]),
            );
        }
        img
    }
}

fn sky_gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |_, y| {
        let t = y as f32 / height.max(1) as f32;
        Rgb([
            (110.0 + 80.0 * t) as u8,
            (160.0 + 60.0 * t) as u8,
            (230.0 + 20.0 * t) as u8,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_moves_five_pixels_per_frame() {
        let (x0, y0, w, h) = mock_target_box(0, 640, 480);
        let (x1, y1, _, _) = mock_target_box(1, 640, 480);
        assert_eq!((x0, y0, w, h), (0.0, 190.0, 100.0, 100.0));
        assert_eq!(x1 - x0, 5.0);
        assert_eq!(y1, y0);
    }

    #[test]
    fn stream_ends_after_max_frames() {
        let mut source = MockSource::new(MockConfig {
            width: 160,
            height: 120,
            fps: 240,
            max_frames: 3,
            seed: 1,
        });
        source.open();
        let timeout = Duration::from_millis(100);
        let seqs: Vec<u64> = std::iter::from_fn(|| source.read(timeout))
            .map(|f| f.sequence())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(source.stats().frames_captured, 3);
    }

    #[test]
    fn closed_source_returns_none() {
        let mut source = MockSource::new(MockConfig::default());
        assert!(source.read(Duration::from_millis(10)).is_none());
    }
}
