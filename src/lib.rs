pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod overlay;
pub mod preview;
pub mod script;
pub mod session;
pub mod sink;

// Re-export vision types for convenience
pub use controller::{ControllerOptions, OverlayController, TrackingLossPolicy};
pub use error::FilterError;
pub use facefilter_vision::{AnchorPose, Frame, TrackingEvent};
pub use overlay::{ClassificationEvent, Expression, Overlay, OverlayId, OverlayState};
pub use sink::PresentationSink;
