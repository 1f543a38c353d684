use std::path::PathBuf;
use thiserror::Error;

/// Conditions the application degrades around instead of failing.
#[derive(Debug, Error)]
pub enum FilterError {
    /// No result, a failed classification, or one below the confidence gate.
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(&'static str),
    /// No overlay is shown at all.
    #[error("face tracking unsupported: {0}")]
    TrackingUnsupported(String),
    /// Overlays keep switching, the mask just stays silent.
    #[error("audio asset missing: {}", .0.display())]
    AudioAssetMissing(PathBuf),
}
