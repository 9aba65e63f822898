#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::DetectionBox;

/// Tract-based backend for ONNX person detectors.
///
/// The model takes a `1 x C x H x W` f32 tensor (C is 1 or 3; luma is
/// replicated across channels) scaled to 0..1 and produces an `N x 5` tensor
/// of `[x, y, width, height, score]` rows in input pixels.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    channels: usize,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32, channels: usize) -> Result<Self> {
        if channels != 1 && channels != 3 {
            return Err(anyhow!("model input must have 1 or 3 channels, got {}", channels));
        }
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, channels, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            channels,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, image: &GrayImage) -> Result<Tensor> {
        if image.width() != self.width || image.height() != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            ));
        }

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, self.channels, self.height as usize, self.width as usize),
            |(_, _, y, x)| image.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0,
        );

        Ok(input.into_tensor())
    }

    fn output_values(&self, outputs: TVec<TValue>) -> Result<Vec<f32>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(rows.iter().copied().collect())
    }
}

/// Turn `[x, y, width, height, score]` rows in model input pixels into frame
/// boxes, most confident first. Coordinates are scaled by `(sx, sy)` before
/// rounding.
fn boxes_from_rows(values: &[f32], threshold: f32, sx: f32, sy: f32) -> Result<Vec<DetectionBox>> {
    if values.len() % 5 != 0 {
        return Err(anyhow!(
            "model output has {} values, expected rows of 5",
            values.len()
        ));
    }

    let mut boxes: Vec<DetectionBox> = values
        .chunks_exact(5)
        .filter(|row| row[4].is_finite() && row[4] >= threshold)
        .map(|row| {
            DetectionBox::new(
                (row[0] * sx).round() as i32,
                (row[1] * sy).round() as i32,
                (row[2] * sx).round() as i32,
                (row[3] * sy).round() as i32,
            )
            .with_confidence(row[4])
        })
        .collect();
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(boxes)
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::PersonDetection)
    }

    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectionBox>> {
        let resized;
        let model_input = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
            &resized
        };
        let input = self.build_input(model_input)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let values = self.output_values(outputs)?;

        let sx = image.width() as f32 / self.width as f32;
        let sy = image.height() as f32 / self.height as f32;
        boxes_from_rows(&values, self.confidence_threshold, sx, sy)
    }
}
