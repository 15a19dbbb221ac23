use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Axis-aligned face rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersect with a `width` x `height` frame. `None` when nothing of the
    /// rectangle is left inside.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRect> {
        let x0 = (self.x as i64).clamp(0, width as i64);
        let y0 = (self.y as i64).clamp(0, height as i64);
        let x1 = (self.x as i64 + self.width as i64).clamp(0, width as i64);
        let y1 = (self.y as i64 + self.height as i64).clamp(0, height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(FaceRect::new(
            x0 as i32,
            y0 as i32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }
}

/// Multi-scale search knobs, fixed when the pipeline is configured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectParams {
    /// Pyramid step between scales, must be greater than 1.
    pub scale_factor: f32,
    /// Candidates a region needs around it to be accepted.
    pub min_neighbors: u32,
    /// Smallest window considered, `(0, 0)` for no limit.
    pub min_size: (u32, u32),
    /// Largest window considered, `(0, 0)` for no limit.
    pub max_size: (u32, u32),
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (0, 0),
            max_size: (0, 0),
        }
    }
}

impl DetectParams {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.scale_factor > 1.0) || !self.scale_factor.is_finite() {
            return Err(PipelineError::Configuration(format!(
                "scale_factor must be a finite value above 1.0, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

/// Locates faces in a grayscale image.
///
/// Implementations must not carry state from one call to the next.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectParams,
    ) -> Result<Vec<FaceRect>, PipelineError>;
}
