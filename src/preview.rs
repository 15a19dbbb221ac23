use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use emocam_vision::FrameSink;
use image::{ImageFormat, RgbImage};

/// Writes each surface to a PNG file, replacing it atomically so viewers
/// never see a half-written frame.
pub struct PreviewSink {
    path: PathBuf,
    temp: PathBuf,
}

impl PreviewSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating preview directory {}", parent.display()))?;
        }
        let temp = path.with_extension("png.tmp");
        Ok(Self { path, temp })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for PreviewSink {
    fn present(&mut self, surface: &RgbImage) -> Result<()> {
        save_png(surface, &self.temp).inspect_err(|_| {
            let _ = std::fs::remove_file(&self.temp);
        })?;
        std::fs::rename(&self.temp, &self.path)
            .with_context(|| format!("replacing preview {}", self.path.display()))
    }
}

pub fn save_png(surface: &RgbImage, path: &Path) -> Result<()> {
    surface
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("writing {}", path.display()))
}
