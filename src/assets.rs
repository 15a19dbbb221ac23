use anyhow::{Context, Result};
use emocam_vision::{ClassNameTable, Engines, HaarCascade, OnnxClassifier, Renderer};

use crate::config::Config;

/// Load cascade, class table and classifier named by the configuration.
pub fn load_engines(cfg: &Config) -> Result<Engines> {
    let cascade = HaarCascade::load(&cfg.cascade)
        .with_context(|| format!("loading face cascade {}", cfg.cascade.display()))?;
    let (w, h) = cascade.window();
    log::debug!("cascade window {}x{}", w, h);

    let classes = ClassNameTable::load(&cfg.classes)
        .with_context(|| format!("loading class names {}", cfg.classes.display()))?;

    let classifier = OnnxClassifier::load(&cfg.model, classes.len())
        .with_context(|| format!("loading classifier {}", cfg.model.display()))?;

    Ok(Engines {
        detector: Box::new(cascade),
        classifier: Box::new(classifier),
        classes,
    })
}

/// Renderer with the configured font, or without glyphs when none is set.
pub fn renderer(cfg: &Config) -> Result<Renderer> {
    let font = match &cfg.font {
        Some(path) => Some(Renderer::load_font(path)?),
        None => {
            log::warn!("no font configured, labels are drawn without text");
            None
        }
    };
    Ok(Renderer::new(font, cfg.draw_all_faces))
}
