//! Drone likelihood scoring.
//!
//! `score = w * model_term + (1 - w) * heuristic`, clamped to `[0, 1]`, where
//! the model term is the raw confidence for the drone class and the
//! complement of it for any other class, and the heuristic rewards drone-like
//! aspect ratios and penalises tall boxes.

use serde::Serialize;

use crate::config::DroneScoreSettings;
use crate::detect::Detection;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DroneScore {
    pub value: f32,
    pub is_drone: bool,
}

/// A detection paired with its drone score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScoredDetection {
    pub detection: Detection,
    pub score: DroneScore,
}

pub fn score(detection: &Detection, settings: &DroneScoreSettings) -> DroneScore {
    let w = settings.model_weight;
    let confidence = detection.confidence.clamp(0.0, 1.0);
    let model_term = if detection.class_id == settings.drone_class_id {
        w * confidence
    } else {
        (1.0 - w) * (1.0 - confidence)
    };
    let value = (model_term + (1.0 - w) * heuristic(detection, settings)).clamp(0.0, 1.0);
    DroneScore {
        value,
        is_drone: value >= settings.drone_threshold,
    }
}

pub fn score_all(detections: &[Detection], settings: &DroneScoreSettings) -> Vec<ScoredDetection> {
    detections
        .iter()
        .map(|d| ScoredDetection {
            detection: *d,
            score: score(d, settings),
        })
        .collect()
}

fn heuristic(detection: &Detection, settings: &DroneScoreSettings) -> f32 {
    if detection.h <= 0.0 {
        return 0.0;
    }
    let ratio = detection.aspect_ratio();
    let mut h = 0.0;
    if (settings.aspect_ratio_min..=settings.aspect_ratio_max).contains(&ratio) {
        h += settings.aspect_bonus;
    }
    if ratio < settings.tall_object_ratio {
        h -= settings.tall_penalty;
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DroneScoreSettings {
        DroneScoreSettings::default()
    }

    #[test]
    fn narrow_box_without_bonus_scores_model_term() {
        // 40/60 = 0.67: outside [0.8, 2.5], above the 0.6 tall cutoff.
        let d = Detection::new(100.0, 100.0, 40.0, 60.0, 0, 0.9);
        let s = score(&d, &settings());
        assert!((s.value - 0.63).abs() < 1e-5, "{}", s.value);
        assert!(s.is_drone);
    }

    #[test]
    fn drone_shaped_box_gets_bonus() {
        let d = Detection::new(0.0, 0.0, 100.0, 100.0, 0, 0.85);
        let s = score(&d, &settings());
        assert!((s.value - (0.7 * 0.85 + 0.3 * 0.15)).abs() < 1e-5);
    }

    #[test]
    fn tall_box_is_penalised() {
        let d = Detection::new(0.0, 0.0, 20.0, 60.0, 0, 0.7);
        let s = score(&d, &settings());
        assert!((s.value - (0.7 * 0.7 - 0.3 * 0.2)).abs() < 1e-5);
        assert!(!s.is_drone);
    }

    #[test]
    fn other_class_uses_complement() {
        let d = Detection::new(0.0, 0.0, 100.0, 100.0, 2, 0.9);
        let s = score(&d, &settings());
        assert!((s.value - (0.3 * 0.1 + 0.3 * 0.15)).abs() < 1e-5);
        assert!(!s.is_drone);
    }

    #[test]
    fn score_is_clamped_and_deterministic() {
        let mut cfg = settings();
        cfg.model_weight = 1.0;
        let d = Detection::new(0.0, 0.0, 10.0, 10.0, 0, 1.5);
        assert_eq!(score(&d, &cfg), score(&d, &cfg));
        assert!(score(&d, &cfg).value <= 1.0);
    }

    #[test]
    fn zero_height_has_no_heuristic() {
        let d = Detection::new(0.0, 0.0, 10.0, 0.0, 0, 0.5);
        assert!((score(&d, &settings()).value - 0.35).abs() < 1e-6);
    }
}
