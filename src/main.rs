use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facefilter::audio::AudioPlayer;
use facefilter::preview::{PreviewSink, Textures};
use facefilter::session::{self, Classifier, SessionOptions};
use facefilter::sink::RecordingSink;
use facefilter::{config, script, FilterError, OverlayController, TrackingLossPolicy};
use facefilter_vision::{ExpressionModel, FaceTracker, TrackerOptions};
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "facefilter")]
#[command(
    version,
    about = "Expression-driven face overlays on a live camera feed"
)]
struct Cli {
    /// Config file (defaults to the user, then the system config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track the camera and switch overlays by expression
    Run {
        /// Write the composited frames to this image file
        #[arg(short, long)]
        preview: Option<PathBuf>,
        /// What to do with the overlay when the face is lost
        #[arg(long, value_enum)]
        on_lost: Option<TrackingLossPolicy>,
    },
    /// Replay a JSON event script and print the resulting sink calls
    Replay {
        script: PathBuf,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { preview, on_lost } => {
            if preview.is_some() {
                cfg.preview = preview;
            }
            if let Some(policy) = on_lost {
                cfg.on_tracking_lost = policy;
            }
            run(&cfg)
        }
        Commands::Replay { script } => replay(&cfg, &script),
        Commands::Config => open_config(&cfg, cli.config.as_deref()),
    }
}

fn run(cfg: &config::Config) -> Result<()> {
    info!("Opening camera: {}", cfg.camera);

    let tracker = match FaceTracker::open(
        &cfg.camera,
        &cfg.detector_model,
        TrackerOptions {
            score_threshold: cfg.detection_threshold,
            lost_after: cfg.lost_after_frames,
            ..Default::default()
        },
    ) {
        Ok(tracker) => tracker,
        Err(e) => {
            error!("{}", FilterError::TrackingUnsupported(format!("{:#}", e)));
            return Ok(());
        }
    };

    let classifiers = (0..cfg.workers)
        .map(|_| {
            ExpressionModel::load(&cfg.expression_model)
                .map(|m| Box::new(m) as Box<dyn Classifier>)
        })
        .collect::<Result<Vec<_>>>()
        .context("Failed to initialize expression classifier")?;

    let audio = match AudioPlayer::load(&cfg.audio_path(), &cfg.audio_player) {
        Ok(player) => Some(player),
        Err(e) => {
            warn!("{}; the mask will be silent", e);
            None
        }
    };
    let sink = PreviewSink::new(
        Textures::load(&cfg.assets),
        &cfg.glasses,
        &cfg.mask,
        audio,
        cfg.preview.clone(),
    );
    let mut controller = OverlayController::new(sink, cfg.controller_options());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received Ctrl-C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl-C handler")?;

    info!("Tracking. Press Ctrl+C to stop.");
    session::run(
        tracker,
        classifiers,
        &mut controller,
        SessionOptions {
            queue_depth: cfg.queue_depth,
        },
        running,
    )?;

    info!("Final overlay: {:?}", controller.state().active);
    Ok(())
}

fn replay(cfg: &config::Config, path: &Path) -> Result<()> {
    let steps = script::load(path)?;
    info!("Replaying {} step(s) from {}", steps.len(), path.display());

    let mut controller = OverlayController::new(RecordingSink::new(), cfg.controller_options());
    script::replay(&steps, &mut controller);

    let state = controller.state();
    for call in &controller.sink().calls {
        println!("{}", serde_json::to_string(call)?);
    }
    println!("{}", serde_json::to_string(&state)?);
    Ok(())
}

fn open_config(cfg: &config::Config, explicit: Option<&Path>) -> Result<()> {
    let config_path = match explicit {
        Some(p) => p.to_path_buf(),
        None => config::user_config_path()
            .filter(|p| p.exists())
            .unwrap_or_else(|| config::CONFIG_PATH.to_path_buf()),
    };
    if !config_path.exists() {
        config::save_config(cfg, Some(&config_path))
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
