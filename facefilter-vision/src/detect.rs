use crate::yunet::{self, INPUT_SIZE};
use anyhow::{Context, Result};
use image::{imageops, GenericImageView, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// A face found in a camera frame, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

impl Detection {
    pub fn center(&self) -> [f32; 2] {
        [
            self.bbox[0] + self.bbox[2] / 2.0,
            self.bbox[1] + self.bbox[3] / 2.0,
        ]
    }
}

/// Run YuNet over a frame.
///
/// The frame is letterboxed into the square detector canvas so faces keep
/// their aspect ratio, then results are mapped back to frame pixels and
/// de-duplicated with NMS.
pub fn detect_faces(
    session: &mut Session,
    frame: &RgbImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("empty frame");
    }
    let size = INPUT_SIZE as u32;
    let scale = size as f32 / width.max(height) as f32;
    let new_w = ((width as f32 * scale) as u32).max(1);
    let new_h = ((height as f32 * scale) as u32).max(1);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imageops::resize(frame, new_w, new_h, imageops::FilterType::Triangle);
    let mut canvas = RgbImage::new(size, size);
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    // planar BGR, 0..255
    let plane = INPUT_SIZE * INPUT_SIZE;
    let mut input = vec![0.0f32; 3 * plane];
    for (i, px) in canvas.pixels().enumerate() {
        input[i] = px[2] as f32;
        input[plane + i] = px[1] as f32;
        input[2 * plane + i] = px[0] as f32;
    }
    let tensor = Value::from_array(Array4::from_shape_vec(
        (1, 3, INPUT_SIZE, INPUT_SIZE),
        input,
    )?)?;

    let outputs = session
        .run(ort::inputs![tensor])
        .context("running face detector")?;

    let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        owned.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let views: Vec<(&[i64], &[f32])> = owned
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let unmap_x = |x: f32| (x - pad_x as f32) / scale;
    let unmap_y = |y: f32| (y - pad_y as f32) / scale;

    let detections: Vec<Detection> = yunet::decode(&views, INPUT_SIZE, score_threshold)?
        .into_iter()
        .map(|c| {
            let mut landmarks = c.landmarks;
            for pair in landmarks.chunks_exact_mut(2) {
                pair[0] = unmap_x(pair[0]);
                pair[1] = unmap_y(pair[1]);
            }
            Detection {
                bbox: [
                    unmap_x(c.bbox[0]),
                    unmap_y(c.bbox[1]),
                    c.bbox[2] / scale,
                    c.bbox[3] / scale,
                ],
                score: c.score,
                landmarks,
            }
        })
        .collect();

    log::trace!(
        "detector: {} candidate(s) in {}x{} frame",
        detections.len(),
        width,
        height
    );

    Ok(nms(detections, nms_threshold))
}

/// Highest-scoring detection, if any.
pub fn best(detections: Vec<Detection>) -> Option<Detection> {
    detections.into_iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Crop `bbox` out of `frame`, clamped to the frame bounds.
pub fn crop(frame: &RgbImage, bbox: &[f32; 4]) -> Option<RgbImage> {
    let (width, height) = frame.dimensions();
    let x0 = bbox[0].max(0.0) as u32;
    let y0 = bbox[1].max(0.0) as u32;
    let x1 = ((bbox[0] + bbox[2]).max(0.0) as u32).min(width);
    let y1 = ((bbox[1] + bbox[3]).max(0.0) as u32).min(height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(frame.view(x0, y0, x1 - x0, y1 - y0).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let v = iou(&a, &b);
        assert!(v > 0.0 && v < 1.0);
        assert_eq!(iou(&a, &[100.0, 100.0, 10.0, 10.0]), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_strongest_of_overlap() {
        let kept = nms(
            vec![
                det([10.0, 10.0, 20.0, 20.0], 0.7),
                det([11.0, 11.0, 20.0, 20.0], 0.9),
                det([200.0, 200.0, 20.0, 20.0], 0.8),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.8);
    }

    #[test]
    fn best_picks_highest_score() {
        let b = best(vec![det([0.0; 4], 0.6), det([1.0; 4], 0.95)]).unwrap();
        assert_eq!(b.score, 0.95);
        assert!(best(Vec::new()).is_none());
    }

    #[test]
    fn crop_clamps_to_frame() {
        let frame = RgbImage::new(100, 80);
        let face = crop(&frame, &[-10.0, 60.0, 50.0, 50.0]).unwrap();
        assert_eq!(face.dimensions(), (40, 20));
        assert!(crop(&frame, &[120.0, 0.0, 10.0, 10.0]).is_none());
    }
}
