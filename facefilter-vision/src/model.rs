use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};
use std::path::Path;

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load(path: &Path, what: &str) -> Result<Session> {
    if !path.is_file() {
        anyhow::bail!("{} model not found at {}", what, path.display());
    }
    log::debug!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

/// YuNet face detector (`face_detection_yunet_2023mar.onnx`).
pub fn detector_session(path: &Path) -> Result<Session> {
    load(path, "detector")
}

/// FER+ expression classifier (`emotion-ferplus-8.onnx`).
pub fn expression_session(path: &Path) -> Result<Session> {
    load(path, "expression")
}
