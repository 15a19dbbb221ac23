use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::board::Classification;
use crate::detect::FaceRect;
use crate::frame::Frame;

const STROKE_COLOR: Rgb<u8> = Rgb([0x10, 0xb9, 0x81]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const STROKE_WIDTH: i32 = 3;
const LABEL_HEIGHT: i32 = 30;
const LABEL_PADDING: i32 = 6;
const LABEL_FONT_SIZE: f32 = 18.0;
// average glyph advance when no font is loaded
const LABEL_CHAR_WIDTH: f32 = 10.0;

/// What to draw on top of a frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overlay<'a> {
    pub faces: &'a [FaceRect],
    pub selected: Option<FaceRect>,
    pub classification: Option<&'a Classification>,
}

/// Draws frames with their detections and label.
pub struct Renderer {
    font: Option<FontVec>,
    draw_all_faces: bool,
}

impl Renderer {
    pub fn new(font: Option<FontVec>, draw_all_faces: bool) -> Self {
        Self {
            font,
            draw_all_faces,
        }
    }

    pub fn load_font(path: &Path) -> Result<FontVec> {
        let data =
            std::fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
        FontVec::try_from_vec(data).with_context(|| format!("parsing font {}", path.display()))
    }

    /// Copy the frame and draw the overlay on the copy. The frame is always
    /// drawn, with or without a detection.
    pub fn render(&self, frame: &Frame, overlay: &Overlay<'_>) -> RgbImage {
        let mut canvas = frame.to_rgb_image();
        if frame.is_empty() {
            return canvas;
        }

        if self.draw_all_faces {
            for face in overlay.faces {
                stroke_rect(&mut canvas, face);
            }
        }

        if let Some(selected) = overlay.selected {
            if !self.draw_all_faces || !overlay.faces.contains(&selected) {
                stroke_rect(&mut canvas, &selected);
            }
            if let Some(result) = overlay.classification {
                self.draw_label(&mut canvas, &selected, &format_label(result));
            }
        }

        canvas
    }

    fn draw_label(&self, canvas: &mut RgbImage, anchor: &FaceRect, label: &str) {
        let scale = PxScale::from(LABEL_FONT_SIZE);
        let (text_w, text_h) = match &self.font {
            Some(font) => {
                let (w, h) = text_size(scale, font, label);
                (w as i32, h as i32)
            }
            None => (
                (label.chars().count() as f32 * LABEL_CHAR_WIDTH).ceil() as i32,
                LABEL_FONT_SIZE as i32,
            ),
        };

        // above the face, or inside it when the face touches the top edge
        let box_x = anchor.x;
        let box_y = if anchor.y >= LABEL_HEIGHT {
            anchor.y - LABEL_HEIGHT
        } else {
            anchor.y
        };
        let box_w = (text_w + 2 * LABEL_PADDING) as u32;
        draw_filled_rect_mut(
            canvas,
            Rect::at(box_x, box_y).of_size(box_w, LABEL_HEIGHT as u32),
            STROKE_COLOR,
        );

        if let Some(font) = &self.font {
            let text_y = box_y + (LABEL_HEIGHT - text_h).max(0) / 2;
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                box_x + LABEL_PADDING,
                text_y,
                scale,
                font,
                label,
            );
        }
    }
}

/// `"<label> <percent>%"` with the percentage rounded to a whole number.
pub fn format_label(result: &Classification) -> String {
    let percent = (result.confidence * 100.0).round() as u32;
    format!("{} {}%", result.label, percent)
}

fn stroke_rect(canvas: &mut RgbImage, face: &FaceRect) {
    // centred on the rectangle edge
    let half = STROKE_WIDTH / 2;
    for offset in -half..=half {
        let w = face.width as i64 - 2 * offset as i64;
        let h = face.height as i64 - 2 * offset as i64;
        if w <= 0 || h <= 0 {
            continue;
        }
        let rect = Rect::at(face.x + offset, face.y + offset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, rect, STROKE_COLOR);
    }
}
