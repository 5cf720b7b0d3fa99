use super::{Alert, AlertHandler};
use crate::error::AlertError;

/// Writes alerts to the log at WARN.
#[derive(Default)]
pub struct ConsoleAlertHandler;

impl AlertHandler for ConsoleAlertHandler {
    fn name(&self) -> &'static str {
        "console"
    }

    fn send_alert(&mut self, alert: &Alert) -> Result<bool, AlertError> {
        let [x, y, w, h] = alert.bbox;
        log::warn!(
            "DRONE DETECTED track={} score={:.2} conf={:.2} bbox=({x:.0},{y:.0},{w:.0}x{h:.0}) frame={}",
            alert.track_id,
            alert.score,
            alert.confidence,
            alert.frame_sequence
        );
        Ok(true)
    }
}
