//! FER+ facial expression classifier.
//!
//! Input is a 64x64 single-channel face crop with raw 0..255 intensities,
//! output is eight unnormalised scores in [`LABELS`] order.

use crate::detect;
use anyhow::{Context, Result};
use image::{imageops, DynamicImage, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};
use std::path::Path;

pub const INPUT_SIZE: u32 = 64;

pub const LABELS: [&str; 8] = [
    "neutral",
    "happiness",
    "surprise",
    "sadness",
    "anger",
    "disgust",
    "fear",
    "contempt",
];

/// Top-1 result for one face crop.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: &'static str,
    pub confidence: f32,
}

pub struct ExpressionModel {
    session: Session,
}

impl ExpressionModel {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            session: crate::model::expression_session(path)?,
        })
    }

    /// Classify the face inside `bbox`. `None` when the box falls outside
    /// the frame.
    pub fn predict(&mut self, frame: &RgbImage, bbox: &[f32; 4]) -> Result<Option<Prediction>> {
        let Some(face) = detect::crop(frame, bbox) else {
            return Ok(None);
        };
        let grey = DynamicImage::ImageRgb8(face).to_luma8();
        let grey = imageops::resize(&grey, INPUT_SIZE, INPUT_SIZE, imageops::FilterType::Triangle);

        let input: Vec<f32> = grey.as_raw().iter().map(|&v| v as f32).collect();
        let tensor = Value::from_array(Array4::from_shape_vec(
            (1, 1, INPUT_SIZE as usize, INPUT_SIZE as usize),
            input,
        )?)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("running expression model")?;
        let (_name, output) = outputs
            .iter()
            .next()
            .context("expression model produced no output")?;
        let (_shape, scores) = output.try_extract_tensor::<f32>()?;
        Ok(top1(scores))
    }
}

/// Softmax over the model scores and pick the most likely label.
pub fn top1(scores: &[f32]) -> Option<Prediction> {
    if scores.len() < LABELS.len() {
        return None;
    }
    let scores = &scores[..LABELS.len()];
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return None;
    }
    let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    let (idx, best) = exp
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    Some(Prediction {
        label: LABELS[idx],
        confidence: best / sum,
    })
}
