//! Scripted event replay.
//!
//! A script is a JSON array of steps:
//!
//! ```json
//! [
//!   "anchor_created",
//!   { "classify": { "label": "Happiness", "confidence": 0.95 } },
//!   "no_result",
//!   "anchor_updated",
//!   "tracking_ended"
//! ]
//! ```

use crate::controller::OverlayController;
use crate::overlay::{ClassificationEvent, Expression};
use crate::sink::PresentationSink;
use anyhow::{Context, Result};
use facefilter_vision::tracker::FACE_HALF_DEPTH_M;
use facefilter_vision::{AnchorPose, Frame};
use image::RgbImage;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AnchorCreated,
    AnchorUpdated,
    Classify { label: String, confidence: f32 },
    NoResult,
    TrackingEnded,
}

pub fn parse(json: &str) -> Result<Vec<Step>> {
    serde_json::from_str(json).context("parsing replay script")
}

pub fn load(path: &Path) -> Result<Vec<Step>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    parse(&raw).with_context(|| format!("in {}", path.display()))
}

/// Fixed pose for scripted anchors: a level face in the middle of a VGA frame.
pub fn scripted_pose() -> AnchorPose {
    AnchorPose {
        center: [320.0, 240.0],
        roll: 0.0,
        scale: 1000.0,
        extent: [0.075, 0.1, FACE_HALF_DEPTH_M],
    }
}

/// Feed `steps` to `controller` in order.
pub fn replay<S: PresentationSink>(steps: &[Step], controller: &mut OverlayController<S>) {
    let pose = scripted_pose();
    let mut seq = 0;
    for step in steps {
        match step {
            Step::AnchorCreated => controller.on_anchor_created(&pose),
            Step::AnchorUpdated => {
                seq += 1;
                let frame = Frame {
                    seq,
                    image: RgbImage::new(640, 480),
                    face: [245.0, 140.0, 150.0, 200.0],
                };
                controller.on_anchor_updated(&pose, &frame);
            }
            Step::Classify { label, confidence } => {
                controller.handle_classification(Some(ClassificationEvent::new(
                    Expression::from_label(label),
                    *confidence,
                )));
            }
            Step::NoResult => {
                controller.handle_classification(None);
            }
            Step::TrackingEnded => controller.on_tracking_ended(),
        }
    }
}
