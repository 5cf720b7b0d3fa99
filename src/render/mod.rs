//! Frame annotation.
//!
//! The overlay renderer draws tracks, scores, lock state and a status banner
//! onto a copy of the frame. The headless renderer leaves pixels alone and
//! logs a summary every `log_interval_frames` frames instead.

mod font;

use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_hollow_rect_mut,
    draw_line_segment_mut,
};
use imageproc::rect::Rect;

pub use font::{draw_text, text_width};

use crate::config::DisplaySettings;
use crate::frame::Frame;
use crate::targeting::{LockState, TargetingStatus};
use crate::track::TrackedObject;

pub const RED: Rgb<u8> = Rgb([255, 40, 40]);
pub const GREEN: Rgb<u8> = Rgb([40, 220, 40]);
pub const YELLOW: Rgb<u8> = Rgb([255, 220, 0]);
pub const ORANGE: Rgb<u8> = Rgb([255, 140, 0]);
pub const GRAY: Rgb<u8> = Rgb([130, 130, 130]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const BANNER_BG: Rgb<u8> = Rgb([30, 30, 30]);
const BANNER_ARMED_BG: Rgb<u8> = Rgb([140, 0, 0]);

const BOX_THICKNESS: i32 = 2;
const BANNER_HEIGHT: u32 = 11;
const SCORE_BAR_HEIGHT: u32 = 3;
const RETICLE_RADIUS: i32 = 14;

/// Everything the renderers need besides the frame.
pub struct RenderContext<'a> {
    pub tracks: &'a [TrackedObject],
    pub targeting: &'a TargetingStatus,
    pub fps: f32,
    pub no_signal: bool,
}

impl RenderContext<'_> {
    fn drone_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.seen_this_frame() && t.is_drone())
            .count()
    }

    fn banner_text(&self, show_fps: bool) -> String {
        let mut text = if self.no_signal {
            "NO SIGNAL".to_string()
        } else {
            match (self.targeting.lock.state, self.targeting.lock.track_id) {
                (LockState::Unlocked, _) | (_, None) => "SEARCHING".to_string(),
                (state, Some(id)) => {
                    let mut s = format!("{} #{id}", state.as_str().to_uppercase());
                    if let Some(target) = &self.targeting.target {
                        if target.distance_m.is_finite() {
                            s.push_str(&format!(" {:.1}M", target.distance_m));
                        }
                    }
                    s
                }
            }
        };
        text.push_str(&format!(" TRK {} DRN {}", self.tracks.len(), self.drone_count()));
        text.push_str(if self.targeting.armed { " ARMED" } else { " SAFE" });
        if show_fps {
            text.push_str(&format!(" FPS {:.1}", self.fps));
        }
        text
    }
}

pub struct OverlayRenderer {
    show_labels: bool,
    show_fps: bool,
}

impl OverlayRenderer {
    pub fn new(settings: &DisplaySettings) -> Self {
        Self {
            show_labels: settings.show_labels,
            show_fps: settings.show_fps,
        }
    }

    pub fn render(&self, frame: &Frame, ctx: &RenderContext<'_>) -> RgbImage {
        let mut canvas = frame.to_canvas();
        let locked = ctx.targeting.lock.track_id;
        for track in ctx.tracks {
            self.draw_track(&mut canvas, track, locked == Some(track.track_id), ctx);
        }
        if let Some(target) = &ctx.targeting.target {
            draw_reticle(&mut canvas, target.centroid, target.lead_point, ctx.targeting.lock.state);
        }
        self.draw_banner(&mut canvas, ctx);
        canvas
    }

    fn draw_track(
        &self,
        canvas: &mut RgbImage,
        track: &TrackedObject,
        locked: bool,
        ctx: &RenderContext<'_>,
    ) {
        let det = &track.detection.detection;
        let color = if !track.seen_this_frame() {
            GRAY
        } else if locked {
            YELLOW
        } else if track.is_drone() {
            RED
        } else {
            GREEN
        };
        let (x, y) = (det.x.round() as i32, det.y.round() as i32);
        let (w, h) = (det.w.round().max(1.0) as u32, det.h.round().max(1.0) as u32);
        draw_thick_rect(canvas, x, y, w, h, color, BOX_THICKNESS);

        let bar_len = ((w as f32) * track.score().clamp(0.0, 1.0)).round() as u32;
        if bar_len > 0 {
            let top = y + h as i32 + BOX_THICKNESS + 1;
            draw_filled_rect_mut(
                canvas,
                Rect::at(x, top).of_size(bar_len, SCORE_BAR_HEIGHT),
                color,
            );
        }

        if self.show_labels {
            let mut label = format!("#{} {:.2}", track.track_id, track.score());
            if locked {
                if let Some(target) = &ctx.targeting.target {
                    if target.distance_m.is_finite() {
                        label.push_str(&format!(" {:.1}M", target.distance_m));
                    }
                }
            }
            let label_y = (y - BOX_THICKNESS - font::GLYPH_HEIGHT - 2).max(BANNER_HEIGHT as i32 + 1);
            draw_text(canvas, &label, x, label_y, BLACK, Some(color));
        }
    }

    fn draw_banner(&self, canvas: &mut RgbImage, ctx: &RenderContext<'_>) {
        let bg = if ctx.targeting.armed {
            BANNER_ARMED_BG
        } else {
            BANNER_BG
        };
        let height = BANNER_HEIGHT.min(canvas.height());
        if canvas.width() == 0 || height == 0 {
            return;
        }
        draw_filled_rect_mut(canvas, Rect::at(0, 0).of_size(canvas.width(), height), bg);
        let fg = if ctx.no_signal {
            ORANGE
        } else {
            match ctx.targeting.lock.state {
                LockState::Locked | LockState::Engaged => YELLOW,
                LockState::Acquiring => ORANGE,
                _ => WHITE,
            }
        };
        draw_text(canvas, &ctx.banner_text(self.show_fps), 2, 2, fg, None);
    }
}

/// Rectangle outline `thickness` pixels wide, growing outwards.
fn draw_thick_rect(
    canvas: &mut RgbImage,
    x: i32,
    y: i32,
    w: u32,
    h: u32,
    color: Rgb<u8>,
    thickness: i32,
) {
    for offset in 0..thickness.max(1) {
        let grow = (offset * 2) as u32;
        draw_hollow_rect_mut(
            canvas,
            Rect::at(x - offset, y - offset).of_size(w + grow, h + grow),
            color,
        );
    }
}

fn draw_reticle(canvas: &mut RgbImage, centroid: (f32, f32), lead: (f32, f32), state: LockState) {
    let color = match state {
        LockState::Locked | LockState::Engaged => YELLOW,
        _ => ORANGE,
    };
    let (cx, cy) = (centroid.0.round() as i32, centroid.1.round() as i32);
    draw_hollow_circle_mut(canvas, (cx, cy), RETICLE_RADIUS, color);
    let r = RETICLE_RADIUS as f32;
    for (dx, dy) in [(-1.0, 0.0), (1.0, 0.0), (0.0, -1.0), (0.0, 1.0)] {
        let outer = (centroid.0 + dx * (r + 4.0), centroid.1 + dy * (r + 4.0));
        let inner = (centroid.0 + dx * (r - 6.0), centroid.1 + dy * (r - 6.0));
        draw_line_segment_mut(canvas, outer, inner, color);
    }
    draw_line_segment_mut(canvas, centroid, lead, color);
    draw_filled_circle_mut(canvas, (lead.0.round() as i32, lead.1.round() as i32), 3, color);
}

/// Logs a one-line summary every `interval` frames.
pub struct HeadlessRenderer {
    interval: u64,
    frames: u64,
}

impl HeadlessRenderer {
    pub fn new(settings: &DisplaySettings) -> Self {
        Self {
            interval: settings.log_interval_frames.max(1),
            frames: 0,
        }
    }

    pub fn render(&mut self, frame: &Frame, ctx: &RenderContext<'_>) -> RgbImage {
        self.frames += 1;
        if self.frames % self.interval == 0 {
            log::info!(
                "frame {}: {} tracks, {} drones, lock={}, armed={}, fps={:.1}{}",
                frame.sequence(),
                ctx.tracks.len(),
                ctx.drone_count(),
                ctx.targeting.lock.state.as_str(),
                ctx.targeting.armed,
                ctx.fps,
                if ctx.no_signal { ", NO SIGNAL" } else { "" }
            );
        }
        frame.to_canvas()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

pub enum FrameRenderer {
    Overlay(OverlayRenderer),
    Headless(HeadlessRenderer),
}

impl FrameRenderer {
    pub fn from_settings(settings: &DisplaySettings) -> Self {
        if settings.headless {
            Self::Headless(HeadlessRenderer::new(settings))
        } else {
            Self::Overlay(OverlayRenderer::new(settings))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Overlay(_) => "overlay",
            Self::Headless(_) => "headless",
        }
    }

    pub fn render(&mut self, frame: &Frame, ctx: &RenderContext<'_>) -> RgbImage {
        match self {
            Self::Overlay(r) => r.render(frame, ctx),
            Self::Headless(r) => r.render(frame, ctx),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
