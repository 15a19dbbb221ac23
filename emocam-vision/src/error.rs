use thiserror::Error;

use crate::detect::FaceRect;

/// Failures the pipeline distinguishes.
///
/// `Initialization` and `Configuration` are raised while bringing the
/// pipeline up and are terminal. Everything else belongs to a single
/// iteration: the driver logs it, skips the affected stages and moves on to
/// the next frame.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("frame unavailable: {0}")]
    Acquisition(String),

    #[error("face detection failed: {0}")]
    Detection(String),

    #[error("region {rect:?} is empty after clamping to the frame")]
    InvalidRegion { rect: FaceRect },

    #[error("inference failed: {0}")]
    Inference(String),
}

impl PipelineError {
    /// Whether the driver may continue with the next frame.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PipelineError::Initialization(_) | PipelineError::Configuration(_)
        )
    }

    /// Wrap an arbitrary loader failure, keeping its context chain.
    pub fn initialization(err: &anyhow::Error) -> Self {
        PipelineError::Initialization(format!("{err:#}"))
    }
}
