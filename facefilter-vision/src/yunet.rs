//! YuNet output decoding.
//!
//! The 2023mar model is anchor-free and emits twelve tensors, grouped by kind
//! and then by stride: `cls_8, cls_16, cls_32, obj_8, .., bbox_8, .., kps_32`.
//! For every grid cell of stride `s` at `(row, col)`:
//!
//! ```text
//! score = sqrt(cls * obj)
//! cx    = (col + dx) * s          w = exp(dw) * s
//! cy    = (row + dy) * s          h = exp(dh) * s
//! kp_k  = ((col, row) + d_k) * s
//! ```
//!
//! Coordinates come out in input-canvas pixels.

use anyhow::{Context, Result};
use ndarray::ArrayView2;

/// Square canvas size the detector was exported with.
pub const INPUT_SIZE: usize = 640;

const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // right eye, left eye, nose, mouth corners
}

pub fn decode(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<Candidate>> {
    if outputs.len() < 12 {
        anyhow::bail!("expected 12 YuNet outputs, got {}", outputs.len());
    }

    let mut found = Vec::new();
    for (scale, &stride) in STRIDES.iter().enumerate() {
        let cols = input_size / stride;
        let cells = cols * cols;
        let cls = tensor(outputs, scale, cells, 1)?;
        let obj = tensor(outputs, scale + 3, cells, 1)?;
        let bbox = tensor(outputs, scale + 6, cells, 4)?;
        let kps = tensor(outputs, scale + 9, cells, 10)?;

        let s = stride as f32;
        for idx in 0..cells {
            let score = (cls[[idx, 0]].clamp(0.0, 1.0) * obj[[idx, 0]].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }
            let col = (idx % cols) as f32;
            let row = (idx / cols) as f32;

            let cx = (col + bbox[[idx, 0]]) * s;
            let cy = (row + bbox[[idx, 1]]) * s;
            let w = bbox[[idx, 2]].exp() * s;
            let h = bbox[[idx, 3]].exp() * s;

            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col + kps[[idx, k * 2]]) * s;
                landmarks[k * 2 + 1] = (row + kps[[idx, k * 2 + 1]]) * s;
            }

            found.push(Candidate {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(found)
}

fn tensor<'a>(
    outputs: &[(&'a [i64], &'a [f32])],
    index: usize,
    rows: usize,
    cols: usize,
) -> Result<ArrayView2<'a, f32>> {
    let (shape, data) = outputs[index];
    if shape != [1, rows as i64, cols as i64].as_slice() {
        anyhow::bail!(
            "output {} has shape {:?}, expected [1, {}, {}]",
            index,
            shape,
            rows,
            cols
        );
    }
    ArrayView2::from_shape((rows, cols), data)
        .with_context(|| format!("reshaping output {}", index))
}
