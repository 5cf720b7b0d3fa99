#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::InferenceError;
use crate::frame::Frame;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Two output layouts are understood:
/// - `[1, 4 + C, N]`: one column per candidate, `cx, cy, w, h` then class scores
/// - `[1, N, 5 + C]`: one row per candidate, `cx, cy, w, h, objectness` then class scores
///
/// Coordinates are in model input pixels and are rescaled to the frame.
pub struct TractBackend {
    model: Option<TypedRunnableModel<TypedModel>>,
    input_size: u32,
}

impl TractBackend {
    pub fn new(input_size: u32) -> Self {
        Self {
            model: None,
            input_size,
        }
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let side = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, output: &Tensor, frame: &Frame, min_confidence: f32) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        }
        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;

        let channels_first = shape[1] < shape[2];
        let (candidates, attrs) = if channels_first {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        let class_offset = if channels_first { 4 } else { 5 };
        if attrs <= class_offset {
            return Err(anyhow!("output has no class scores: {:?}", shape));
        }
        let at = |i: usize, a: usize| -> f32 {
            if channels_first {
                view[[0, a, i]]
            } else {
                view[[0, i, a]]
            }
        };

        let mut detections = Vec::new();
        for i in 0..candidates {
            let objectness = if channels_first { 1.0 } else { at(i, 4) };
            let (class_id, class_score) = (class_offset..attrs)
                .map(|a| (a - class_offset, at(i, a)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            let confidence = objectness * class_score;
            if !confidence.is_finite() || confidence < min_confidence {
                continue;
            }
            let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
            detections.push(
                Detection::new(
                    (cx - w / 2.0) * sx,
                    (cy - h / 2.0) * sy,
                    w * sx,
                    h * sy,
                    class_id as u32,
                    confidence.clamp(0.0, 1.0),
                )
                .clamped(frame.width(), frame.height()),
            );
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load_model(&mut self, path: &Path) -> Result<(), InferenceError> {
        let side = self.input_size as usize;
        let load_err = |reason: String| InferenceError::ModelLoad {
            path: path.display().to_string(),
            reason,
        };
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| load_err(format!("read model: {e}")))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .map_err(|e| load_err(format!("set input fact: {e}")))?
            .into_optimized()
            .map_err(|e| load_err(format!("optimize: {e}")))?
            .into_runnable()
            .map_err(|e| load_err(format!("build runnable: {e}")))?;
        self.model = Some(model);
        log::info!("TractBackend: loaded {} ({}x{})", path.display(), side, side);
        Ok(())
    }

    fn infer(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<Detection>> {
        let model = self.model.as_ref().ok_or(InferenceError::NotLoaded)?;
        let input = self.build_input(frame);
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode(output, frame, min_confidence)
    }
}
