use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

use crate::detect::FaceRect;
use crate::error::PipelineError;
use crate::frame::Frame;

/// Side length of the classifier input.
pub const INPUT_SIZE: u32 = 64;

/// Fixed classifier input shape, NCHW.
pub const INPUT_SHAPE: [usize; 4] = [1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];

/// Classifier input: `[1, 3, 64, 64]`, R/G/B planes, samples in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor(Array4<f32>);

impl InputTensor {
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn array(&self) -> &Array4<f32> {
        &self.0
    }
}

/// Crop `rect` out of the frame and turn it into the classifier input.
pub fn prepare(frame: &Frame, rect: FaceRect) -> Result<InputTensor, PipelineError> {
    let region = rect
        .clamp_to(frame.width(), frame.height())
        .ok_or(PipelineError::InvalidRegion { rect })?;

    let crop = crop_rgb(frame, &region);
    let face = image::imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let pixel_count = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0f32; 3 * pixel_count];
    let (r_channel, rest) = input_data.split_at_mut(pixel_count);
    let (g_channel, b_channel) = rest.split_at_mut(pixel_count);

    let pixels = face.as_raw();
    for i in 0..pixel_count {
        let idx = i * 3;
        r_channel[i] = pixels[idx] as f32 / 255.0;
        g_channel[i] = pixels[idx + 1] as f32 / 255.0;
        b_channel[i] = pixels[idx + 2] as f32 / 255.0;
    }

    let array = Array4::from_shape_vec(INPUT_SHAPE, input_data)
        .map_err(|e| PipelineError::Configuration(format!("input tensor shape: {e}")))?;
    Ok(InputTensor(array))
}

/// Copy a region that is already known to lie inside the frame.
fn crop_rgb(frame: &Frame, region: &FaceRect) -> RgbImage {
    let (x0, y0) = (region.x as u32, region.y as u32);
    RgbImage::from_fn(region.width, region.height, |x, y| {
        image::Rgb(frame.rgb_at(x0 + x, y0 + y))
    })
}
