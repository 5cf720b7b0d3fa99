use crate::config::TargetingSettings;
use crate::detect::Detection;

/// Pinhole range estimate from apparent size.
///
/// Assumes every target spans `assumed_drone_size_m` across its larger box
/// side, so the estimate is only as good as that assumption. Frame width is in
/// pixels; focal length and sensor width in millimetres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceEstimator {
    focal_px: f32,
    target_size_m: f32,
}

impl DistanceEstimator {
    pub fn new(settings: &TargetingSettings, frame_width: u32) -> Self {
        let focal_px = if settings.sensor_width_mm > 0.0 {
            settings.focal_length_mm / settings.sensor_width_mm * frame_width as f32
        } else {
            0.0
        };
        Self {
            focal_px,
            target_size_m: settings.assumed_drone_size_m,
        }
    }

    pub fn focal_px(&self) -> f32 {
        self.focal_px
    }

    /// Metres to the target; infinite for an empty box.
    pub fn distance_m(&self, detection: &Detection) -> f32 {
        let size_px = detection.size_px();
        if size_px <= 0.0 || !size_px.is_finite() {
            return f32::INFINITY;
        }
        self.target_size_m * self.focal_px / size_px
    }

    /// Metres per pixel at the target's range.
    pub fn metres_per_px(&self, detection: &Detection) -> f32 {
        let size_px = detection.size_px();
        if size_px <= 0.0 || !size_px.is_finite() {
            return f32::INFINITY;
        }
        self.target_size_m / size_px
    }

    /// Target speed in m/s from image-plane velocity in pixels per frame.
    pub fn speed_ms(&self, detection: &Detection, velocity_px: (f32, f32), frame_dt_s: f32) -> f32 {
        if frame_dt_s <= 0.0 {
            return f32::INFINITY;
        }
        let px_per_frame = velocity_px.0.hypot(velocity_px.1);
        if px_per_frame == 0.0 {
            return 0.0;
        }
        px_per_frame * self.metres_per_px(detection) / frame_dt_s
    }
}
