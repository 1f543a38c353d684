pub mod detect;
pub mod expression;
pub mod model;
pub mod tracker;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use detect::Detection;
pub use expression::{ExpressionModel, Prediction};
pub use tracker::{AnchorPose, FaceTracker, Frame, TrackerOptions, TrackingEvent};
pub use video::Camera;
