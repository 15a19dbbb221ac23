use std::collections::VecDeque;
use std::path::PathBuf;

use crate::error::PipelineError;
use crate::frame::Frame;

/// Pull-based frame supplier.
///
/// `Err(Acquisition)` means no usable frame this time and the caller should
/// try again on the next iteration. `Ok(None)` marks the end of a finite
/// source.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

/// Still images read from disk, one frame per file.
pub struct ImageSource {
    paths: VecDeque<PathBuf>,
    current: Option<PathBuf>,
}

impl ImageSource {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            current: None,
        }
    }

    /// File the last frame was read from.
    pub fn current(&self) -> Option<&PathBuf> {
        self.current.as_ref()
    }
}

impl FrameSource for ImageSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        log::debug!("reading {}", path.display());
        let frame = image::open(&path)
            .map(|img| Frame::from(img.to_rgba8()))
            .map_err(|e| PipelineError::Acquisition(format!("{}: {}", path.display(), e)));
        self.current = Some(path);
        frame.map(Some)
    }
}

impl<I> FrameSource for I
where
    I: Iterator<Item = Result<Frame, PipelineError>>,
{
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        self.next().transpose()
    }
}
