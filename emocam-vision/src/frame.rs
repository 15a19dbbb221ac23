use image::{GrayImage, RgbImage, RgbaImage};

use crate::error::PipelineError;

/// A captured frame: interleaved 8-bit samples, row-major, RGB or RGBA.
///
/// A frame lives for exactly one pipeline iteration and is never modified
/// after acquisition.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

impl Frame {
    /// Build a frame from raw samples. Anything but 3 or 4 channels, or a
    /// buffer whose length disagrees with the dimensions, is a malformed
    /// frame.
    pub fn from_raw(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<Self, PipelineError> {
        if channels != 3 && channels != 4 {
            return Err(PipelineError::Acquisition(format!(
                "unsupported channel count {channels}"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(PipelineError::Acquisition(format!(
                "buffer holds {} bytes, {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Red, green and blue samples of pixel (x, y).
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// Luma plane using the BT.601 weights, in 14-bit fixed point with
    /// rounding.
    pub fn to_gray(&self) -> GrayImage {
        const R_W: u32 = 4899;
        const G_W: u32 = 9617;
        const B_W: u32 = 1868;
        const ROUND: u32 = 1 << 13;

        let pixels = self
            .data
            .chunks_exact(self.channels as usize)
            .map(|px| {
                let luma = px[0] as u32 * R_W + px[1] as u32 * G_W + px[2] as u32 * B_W;
                ((luma + ROUND) >> 14) as u8
            })
            .collect();
        GrayImage::from_raw(self.width, self.height, pixels)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// Opaque RGB copy of the frame, used as the drawing surface.
    pub fn to_rgb_image(&self) -> RgbImage {
        let pixels = match self.channels {
            3 => self.data.clone(),
            _ => self
                .data
                .chunks_exact(self.channels as usize)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };
        RgbImage::from_raw(self.width, self.height, pixels)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

impl From<RgbImage> for Frame {
    fn from(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            channels: 3,
        }
    }
}

impl From<RgbaImage> for Frame {
    fn from(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            channels: 4,
        }
    }
}
