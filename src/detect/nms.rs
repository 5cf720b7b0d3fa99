use std::cmp::Ordering;

use super::result::Detection;

/// Drop detections below `confidence_threshold`, then suppress same-class
/// overlaps whose IoU exceeds `iou_threshold`.
///
/// Candidates are visited by descending confidence; equal confidences visit
/// the larger box first so it survives, and remaining ties keep input order.
pub fn filter_and_suppress(
    detections: Vec<Detection>,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Vec<Detection> {
    let mut candidates: Vec<(usize, Detection)> = detections
        .into_iter()
        .filter(|d| d.confidence.is_finite() && d.confidence >= confidence_threshold)
        .filter(|d| d.w > 0.0 && d.h > 0.0)
        .enumerate()
        .collect();

    candidates.sort_by(|(ia, a), (ib, b)| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.area().partial_cmp(&a.area()).unwrap_or(Ordering::Equal))
            .then_with(|| ia.cmp(ib))
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for (_, candidate) in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
