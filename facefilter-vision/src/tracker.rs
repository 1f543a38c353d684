//! Single-face anchor tracking on top of the camera and detector.
//!
//! A face "anchor" is acquired on the first frame with a detection and held
//! while detections keep coming. It is released after `lost_after`
//! consecutive frames without one.

use crate::detect::{self, Detection};
use crate::video::Camera;
use anyhow::{Context, Result};
use image::RgbImage;
use ort::session::Session;
use std::path::Path;

/// Average adult face width, used to turn pixels into metres.
pub const FACE_WIDTH_M: f32 = 0.15;
/// Half depth of the face bounding volume along the forward axis.
pub const FACE_HALF_DEPTH_M: f32 = 0.065;

/// Where the tracked face is in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPose {
    /// Face centre in frame pixels.
    pub center: [f32; 2],
    /// In-plane rotation in radians, taken from the eye line.
    pub roll: f32,
    /// Pixels per metre at the face.
    pub scale: f32,
    /// Half-size of the face bounding volume in metres (x, y, z).
    pub extent: [f32; 3],
}

impl AnchorPose {
    pub fn from_detection(det: &Detection) -> Self {
        let [lx, ly, rx, ry] = [
            det.landmarks[0],
            det.landmarks[1],
            det.landmarks[2],
            det.landmarks[3],
        ];
        let roll = if (rx - lx).abs() + (ry - ly).abs() > f32::EPSILON {
            (ry - ly).atan2(rx - lx)
        } else {
            0.0
        };
        let scale = det.bbox[2].max(1.0) / FACE_WIDTH_M;
        Self {
            center: det.center(),
            roll,
            scale,
            extent: [
                FACE_WIDTH_M / 2.0,
                det.bbox[3] / scale / 2.0,
                FACE_HALF_DEPTH_M,
            ],
        }
    }

    /// Project a point given in anchor-local metres (x right, y up) to frame pixels.
    pub fn project(&self, x: f32, y: f32) -> [f32; 2] {
        let (sin, cos) = self.roll.sin_cos();
        let px = x * self.scale;
        let py = -y * self.scale;
        [
            self.center[0] + px * cos - py * sin,
            self.center[1] + px * sin + py * cos,
        ]
    }
}

/// A camera frame with the face that was found in it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u32,
    pub image: RgbImage,
    pub face: [f32; 4],
}

#[derive(Debug, Clone)]
pub enum TrackingEvent {
    AnchorCreated(AnchorPose),
    AnchorUpdated(AnchorPose, Frame),
    TrackingEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockChange {
    Acquired,
    Held,
    Missed,
    Lost,
    Searching,
}

/// Lock/loss bookkeeping, independent of any camera.
#[derive(Debug, Clone)]
pub struct TrackLock {
    locked: bool,
    misses: u32,
    lost_after: u32,
}

impl TrackLock {
    pub fn new(lost_after: u32) -> Self {
        Self {
            locked: false,
            misses: 0,
            lost_after: lost_after.max(1),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn observe(&mut self, face_found: bool) -> LockChange {
        match (self.locked, face_found) {
            (false, true) => {
                self.locked = true;
                self.misses = 0;
                LockChange::Acquired
            }
            (false, false) => LockChange::Searching,
            (true, true) => {
                self.misses = 0;
                LockChange::Held
            }
            (true, false) => {
                self.misses += 1;
                if self.misses >= self.lost_after {
                    self.locked = false;
                    self.misses = 0;
                    LockChange::Lost
                } else {
                    LockChange::Missed
                }
            }
        }
    }
}

pub struct TrackerOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub lost_after: u32,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
            lost_after: 5,
        }
    }
}

/// Camera + YuNet tracking source.
pub struct FaceTracker {
    camera: Camera,
    detector: Session,
    lock: TrackLock,
    options: TrackerOptions,
}

impl FaceTracker {
    pub fn open(camera: &str, detector_model: &Path, options: TrackerOptions) -> Result<Self> {
        let detector = crate::model::detector_session(detector_model)?;
        let camera = Camera::open(camera).context("Failed to open camera")?;
        let (width, height) = camera.dimensions();
        log::info!("capturing {}x{}", width, height);
        Ok(Self {
            camera,
            detector,
            lock: TrackLock::new(options.lost_after),
            options,
        })
    }

    /// Capture and inspect one frame. `Ok(None)` means the frame changed
    /// nothing worth reporting (searching, or a miss within the grace period).
    pub fn next_event(&mut self) -> Result<Option<TrackingEvent>> {
        let (seq, image) = self.camera.capture()?;
        let found = detect::best(detect::detect_faces(
            &mut self.detector,
            &image,
            self.options.score_threshold,
            self.options.nms_threshold,
        )?);

        let event = match (self.lock.observe(found.is_some()), found) {
            (LockChange::Acquired, Some(det)) => {
                log::info!("face acquired (score {:.3})", det.score);
                TrackingEvent::AnchorCreated(AnchorPose::from_detection(&det))
            }
            (LockChange::Held, Some(det)) => {
                let pose = AnchorPose::from_detection(&det);
                let frame = Frame {
                    seq,
                    image,
                    face: det.bbox,
                };
                TrackingEvent::AnchorUpdated(pose, frame)
            }
            (LockChange::Lost, _) => {
                log::info!("face lost");
                TrackingEvent::TrackingEnded
            }
            (change, _) => {
                log::trace!("frame {}: {:?}", seq, change);
                return Ok(None);
            }
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquires_and_loses() {
        let mut lock = TrackLock::new(3);
        assert_eq!(lock.observe(false), LockChange::Searching);
        assert_eq!(lock.observe(true), LockChange::Acquired);
        assert_eq!(lock.observe(true), LockChange::Held);
        assert_eq!(lock.observe(false), LockChange::Missed);
        assert_eq!(lock.observe(true), LockChange::Held);
        assert_eq!(lock.observe(false), LockChange::Missed);
        assert_eq!(lock.observe(false), LockChange::Missed);
        assert_eq!(lock.observe(false), LockChange::Lost);
        assert!(!lock.is_locked());
        assert_eq!(lock.observe(true), LockChange::Acquired);
    }

    #[test]
    fn zero_grace_still_needs_one_miss() {
        let mut lock = TrackLock::new(0);
        lock.observe(true);
        assert_eq!(lock.observe(false), LockChange::Lost);
    }

    #[test]
    fn pose_from_level_face() {
        let det = Detection {
            bbox: [100.0, 50.0, 150.0, 200.0],
            score: 0.9,
            landmarks: [140.0, 120.0, 210.0, 120.0, 175.0, 150.0, 0.0, 0.0, 0.0, 0.0],
        };
        let pose = AnchorPose::from_detection(&det);
        assert_eq!(pose.center, [175.0, 150.0]);
        assert!(pose.roll.abs() < 1e-6);
        assert!((pose.scale - 1000.0).abs() < 1e-3);
        assert!((pose.extent[1] - 0.1).abs() < 1e-6);

        // 0.05 m up is 50 px towards the top of the frame
        let p = pose.project(0.0, 0.05);
        assert!((p[0] - 175.0).abs() < 1e-3);
        assert!((p[1] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn project_follows_roll() {
        let pose = AnchorPose {
            center: [0.0, 0.0],
            roll: std::f32::consts::FRAC_PI_2,
            scale: 100.0,
            extent: [0.075, 0.1, FACE_HALF_DEPTH_M],
        };
        // head tilted 90 degrees: local "up" points along +x in the frame
        let p = pose.project(0.0, 1.0);
        assert!((p[0] - 100.0).abs() < 1e-3);
        assert!(p[1].abs() < 1e-3);
    }
}
