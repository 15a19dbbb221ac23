use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emocam::{assets, config, preview};
use emocam_vision::render::format_label;
use emocam_vision::schedule::{FrameTicker, StopHandle};
use emocam_vision::{Board, Camera, Driver, DriverSettings, FrameSink, ImageSource};
use image::RgbImage;
use log::{info, warn};

#[derive(Parser)]
#[command(name = "emocam")]
#[command(version, about = "Live facial emotion recognition from a camera")]
struct Cli {
    /// Configuration file (defaults to the system-wide one)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify faces from the camera until interrupted
    Run {
        /// Write the annotated frame to this PNG file
        #[arg(short, long)]
        preview: Option<PathBuf>,
        /// Stop after this many frames
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        frames: Option<u64>,
    },
    /// Classify the largest face in each image
    Classify {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Save annotated copies into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,
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
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run { preview, frames } => {
            let cfg = config::load_config(config_path)?;
            run(&cfg, preview, frames)
        }
        Commands::Classify { images, out } => {
            let cfg = config::load_config(config_path)?;
            classify(&cfg, images, out)
        }
        Commands::Config => open_config(config_path.unwrap_or(&config::CONFIG_PATH)),
    }
}

fn driver(cfg: &config::Config, board: Board) -> Result<Driver> {
    let settings = DriverSettings {
        detect: cfg.detect,
        clear_after_misses: cfg.clear_after_misses,
    };
    let mut driver = Driver::new(settings, assets::renderer(cfg)?, board)
        .context("Invalid detection settings")?;
    driver
        .initialize(|| assets::load_engines(cfg))
        .context("Failed to initialize emotion pipeline")?;
    Ok(driver)
}

/// Presents surfaces during `run`: logs label changes, forwards to the
/// preview file and enforces the frame limit.
struct Monitor {
    board: Board,
    preview: Option<preview::PreviewSink>,
    last_label: Option<String>,
    presented: u64,
    limit: Option<u64>,
    stop: StopHandle,
}

impl FrameSink for Monitor {
    fn present(&mut self, surface: &RgbImage) -> Result<()> {
        self.presented += 1;
        if self.limit.is_some_and(|limit| self.presented >= limit) {
            self.stop.request();
        }

        let label = self.board.latest().map(|c| c.label);
        if label != self.last_label {
            info!("Emotion: {}", self.board.latest_text());
            self.last_label = label;
        }

        match &mut self.preview {
            Some(sink) => sink.present(surface),
            None => Ok(()),
        }
    }
}

fn run(cfg: &config::Config, preview: Option<PathBuf>, frames: Option<u64>) -> Result<()> {
    let board = Board::new();
    let mut driver = driver(cfg, board.clone())?;

    info!("Opening camera: {}", cfg.camera);
    let mut camera = Camera::open(&cfg.camera).context("Failed to open camera")?;

    let stop = StopHandle::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.request())
        .context("Failed to install Ctrl+C handler")?;

    let preview = match preview.or_else(|| cfg.preview.clone()) {
        Some(path) => {
            let sink = preview::PreviewSink::new(path)?;
            info!("Writing preview to {}", sink.path().display());
            Some(sink)
        }
        None => None,
    };

    let mut monitor = Monitor {
        board,
        preview,
        last_label: None,
        presented: 0,
        limit: frames,
        stop: stop.clone(),
    };
    let mut ticker = FrameTicker::new(cfg.fps);

    info!("Camera opened. Press Ctrl+C to stop.");
    let summary = driver.run(&mut camera, &mut monitor, &mut ticker, &stop)?;
    info!(
        "Processed {} frames, {} classified",
        summary.iterations, summary.classified
    );
    Ok(())
}

fn classify(cfg: &config::Config, images: Vec<PathBuf>, out: Option<PathBuf>) -> Result<()> {
    let mut driver = driver(cfg, Board::new())?;
    driver.start()?;

    if let Some(dir) = &out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let mut source = ImageSource::new(images);
    loop {
        let it = driver.iterate(&mut source);
        if it.end_of_stream {
            break;
        }
        let Some(path) = source.current() else {
            continue;
        };

        match (&it.classification, &it.error) {
            (Some(result), _) => println!("{}: {}", path.display(), format_label(result)),
            (None, Some(e)) => println!("{}: {}", path.display(), e),
            (None, None) => println!("{}: no face", path.display()),
        }

        if let (Some(dir), Some(surface)) = (&out, &it.surface) {
            let name = path
                .file_stem()
                .map(|s| format!("{}.png", s.to_string_lossy()))
                .unwrap_or_else(|| "frame.png".to_string());
            if let Err(e) = preview::save_png(surface, &dir.join(name)) {
                warn!("{:#}", e);
            }
        }
    }

    driver.stop();
    Ok(())
}

fn open_config(path: &Path) -> Result<()> {
    if !path.exists() {
        info!("Writing default config to {}", path.display());
        config::save_config(&config::Config::default(), Some(path))
            .context("Failed to write default config")?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    info!("Opening config file: {:?}", path);

    let status = std::process::Command::new(editor)
        .arg(path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
