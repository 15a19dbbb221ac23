use anyhow::{Context, Result};
use emocam_vision::DetectParams;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("EMOCAM_CONFIG_PATH").unwrap_or("/usr/local/etc/emocam/config.toml"))
});

pub static ASSET_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("EMOCAM_ASSET_PREFIX").unwrap_or("/usr/local/share/emocam"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    /// Haar cascade, OpenCV XML or JSON.
    pub cascade: PathBuf,
    /// Emotion classifier (ONNX).
    pub model: PathBuf,
    /// JSON array of class names, in model output order.
    pub classes: PathBuf,
    /// TTF/OTF font for the label; without one the label box has no text.
    pub font: Option<PathBuf>,
    pub fps: u32,
    pub draw_all_faces: bool,
    /// Forget the shown result after this many frames without a face.
    pub clear_after_misses: Option<u32>,
    /// Where `run` writes the annotated frame.
    pub preview: Option<PathBuf>,
    pub detect: DetectParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            cascade: ASSET_PREFIX.join("haarcascade_frontalface_default.xml"),
            model: ASSET_PREFIX.join("emotion.onnx"),
            classes: ASSET_PREFIX.join("classes.json"),
            font: None,
            fps: 60,
            draw_all_faces: true,
            clear_after_misses: None,
            preview: None,
            detect: DetectParams::default(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
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
