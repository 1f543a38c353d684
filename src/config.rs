use crate::controller::{ControllerOptions, Placement, TrackingLossPolicy};
use crate::overlay::CONFIDENCE_GATE;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFILTER_CONFIG_PATH").unwrap_or("/usr/local/etc/facefilter/config.toml"))
});

pub static DATA_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFILTER_DATA_PREFIX").unwrap_or("/usr/local/share/facefilter"))
});

/// Per-user config, checked before the system-wide one.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "facefilter").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub detector_model: PathBuf,
    pub expression_model: PathBuf,
    /// Directory holding the overlay textures and the audio track.
    pub assets: PathBuf,
    pub audio_asset: String,
    /// Player invocation; the track path is appended.
    pub audio_player: Vec<String>,
    /// Where to write the composited preview, if anywhere.
    pub preview: Option<PathBuf>,
    pub confidence_gate: f32,
    pub on_tracking_lost: TrackingLossPolicy,
    pub detection_threshold: f32,
    /// Consecutive frames without a face before tracking counts as lost.
    pub lost_after_frames: u32,
    pub workers: usize,
    pub queue_depth: usize,
    #[serde(deserialize_with = "glasses_placement")]
    pub glasses: Placement,
    #[serde(deserialize_with = "mask_placement")]
    pub mask: Placement,
}

/// A `[glasses]` or `[mask]` table; missing keys keep that overlay's default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PlacementTable {
    vertical_offset: Option<f32>,
    depth_ratio: Option<f32>,
    size: Option<[f32; 2]>,
}

impl PlacementTable {
    fn over(self, base: Placement) -> Placement {
        Placement {
            vertical_offset: self.vertical_offset.unwrap_or(base.vertical_offset),
            depth_ratio: self.depth_ratio.unwrap_or(base.depth_ratio),
            size: self.size.unwrap_or(base.size),
        }
    }
}

fn glasses_placement<'de, D: Deserializer<'de>>(d: D) -> Result<Placement, D::Error> {
    PlacementTable::deserialize(d).map(|t| t.over(Placement::GLASSES))
}

fn mask_placement<'de, D: Deserializer<'de>>(d: D) -> Result<Placement, D::Error> {
    PlacementTable::deserialize(d).map(|t| t.over(Placement::MASK))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            detector_model: DATA_PREFIX.join("models/face_detection_yunet_2023mar.onnx"),
            expression_model: DATA_PREFIX.join("models/emotion-ferplus-8.onnx"),
            assets: DATA_PREFIX.join("assets"),
            audio_asset: "ben10.mp3".to_string(),
            audio_player: vec![
                "mpv".to_string(),
                "--no-video".to_string(),
                "--really-quiet".to_string(),
            ],
            preview: None,
            confidence_gate: CONFIDENCE_GATE,
            on_tracking_lost: TrackingLossPolicy::Reset,
            detection_threshold: 0.6,
            lost_after_frames: 5,
            workers: 1,
            queue_depth: 2,
            glasses: Placement::GLASSES,
            mask: Placement::MASK,
        }
    }
}

impl Config {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            gate: self.confidence_gate,
            on_tracking_lost: self.on_tracking_lost,
            glasses: self.glasses,
            mask: self.mask,
        }
    }

    pub fn audio_path(&self) -> PathBuf {
        self.assets.join(&self.audio_asset)
    }
}

/// Load from `path`, or the first of the user and system config files that
/// exists. No file at all means defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match user_config_path().filter(|p| p.exists()) {
            Some(p) => p,
            None => CONFIG_PATH.to_path_buf(),
        },
    };
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    validate(&cfg).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

fn validate(cfg: &Config) -> Result<()> {
    if !(0.0..1.0).contains(&cfg.confidence_gate) {
        anyhow::bail!("confidence_gate must be in [0, 1), got {}", cfg.confidence_gate);
    }
    if cfg.workers == 0 {
        anyhow::bail!("workers must be at least 1");
    }
    if cfg.queue_depth == 0 {
        anyhow::bail!("queue_depth must be at least 1");
    }
    Ok(())
}
