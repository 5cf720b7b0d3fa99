use serde::Serialize;

/// One inference result in frame pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub class_id: u32,
    pub confidence: f32,
}

impl Detection {
    pub fn new(x: f32, y: f32, w: f32, h: f32, class_id: u32, confidence: f32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            class_id,
            confidence,
        }
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn centroid(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Width over height; zero for degenerate boxes.
    pub fn aspect_ratio(&self) -> f32 {
        if self.h > 0.0 {
            self.w / self.h
        } else {
            0.0
        }
    }

    /// Larger box side in pixels.
    pub fn size_px(&self) -> f32 {
        self.w.max(self.h)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clip the box to a `width` x `height` frame.
    pub fn clamped(mut self, width: u32, height: u32) -> Self {
        let (fw, fh) = (width as f32, height as f32);
        let x2 = (self.x + self.w).clamp(0.0, fw);
        let y2 = (self.y + self.h).clamp(0.0, fh);
        self.x = self.x.clamp(0.0, fw);
        self.y = self.y.clamp(0.0, fh);
        self.w = (x2 - self.x).max(0.0);
        self.h = (y2 - self.y).max(0.0);
        self
    }

    pub fn bbox(&self) -> [f32; 4] {
        [self.x, self.y, self.w, self.h]
    }
}
