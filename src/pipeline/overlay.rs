//! Frame annotation.
//!
//! Boxes are always drawn. Captions need a font; without one they are skipped.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;

const WEAPON_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CLEAR_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_ORIGIN: (i32, i32) = (10, 10);
const BOX_THICKNESS: i32 = 2;

pub struct Overlay {
    font: Option<FontArc>,
    scale: PxScale,
}

impl Overlay {
    pub fn new(font: Option<FontArc>) -> Self {
        Self {
            font,
            scale: PxScale::from(24.0),
        }
    }

    pub fn without_font() -> Self {
        Self::new(None)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))?;
        Ok(Self::new(Some(font)))
    }

    /// Frame border plus `"{class}: {conf:.2}"` label. Red for weapons,
    /// green for the background class.
    pub fn draw_detection(&self, frame: &mut RgbImage, detection: &Detection, is_weapon: bool) {
        let color = if is_weapon { WEAPON_COLOR } else { CLEAR_COLOR };
        let [x0, y0, x1, y1] = detection.bbox;
        let width = x1.saturating_sub(x0);
        let height = y1.saturating_sub(y0);
        for offset in 0..BOX_THICKNESS {
            let w = width as i32 - offset * 2;
            let h = height as i32 - offset * 2;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x0 as i32 + offset, y0 as i32 + offset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(frame, rect, color);
        }

        let label = format!("{}: {:.2}", detection.class_name, detection.confidence);
        self.caption(frame, &label, LABEL_ORIGIN, color);
    }

    /// Black frame with `Camera {index} not available`.
    pub fn placeholder(&self, width: u32, height: u32, camera_index: u32) -> RgbImage {
        let mut frame = RgbImage::new(width.max(1), height.max(1));
        let text = format!("Camera {} not available", camera_index);
        let origin = (50i32.min(width as i32 / 4), height as i32 / 2);
        if let Some(font) = &self.font {
            draw_text_mut(&mut frame, TEXT_COLOR, origin.0, origin.1, self.scale, font, &text);
        }
        frame
    }

    fn caption(&self, frame: &mut RgbImage, text: &str, origin: (i32, i32), background: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let (text_w, text_h) = imageproc::drawing::text_size(self.scale, font, text);
        if text_w > 0 && text_h > 0 {
            let rect = Rect::at(origin.0 - 4, origin.1 - 4).of_size(text_w + 8, text_h + 8);
            draw_filled_rect_mut(frame, rect, background);
        }
        draw_text_mut(frame, TEXT_COLOR, origin.0, origin.1, self.scale, font, text);
    }
}

impl Default for Overlay {
    fn default() -> Self {
        Self::without_font()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(width: u32, height: u32) -> Detection {
        Detection {
            bbox: [0, 0, width, height],
            confidence: 0.85,
            class_name: "Gun".to_string(),
            class_id: 2,
            classification_type: "full_image".to_string(),
        }
    }

    #[test]
    fn weapon_border_is_red() {
        let overlay = Overlay::without_font();
        let mut frame = RgbImage::new(20, 10);
        overlay.draw_detection(&mut frame, &detection(20, 10), true);
        assert_eq!(*frame.get_pixel(0, 0), WEAPON_COLOR);
        assert_eq!(*frame.get_pixel(19, 9), WEAPON_COLOR);
        assert_eq!(*frame.get_pixel(10, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn background_border_is_green() {
        let overlay = Overlay::without_font();
        let mut frame = RgbImage::new(20, 10);
        overlay.draw_detection(&mut frame, &detection(20, 10), false);
        assert_eq!(*frame.get_pixel(1, 1), CLEAR_COLOR);
    }

    #[test]
    fn placeholder_is_black_at_capture_size() {
        let overlay = Overlay::without_font();
        let frame = overlay.placeholder(640, 480, 3);
        assert_eq!(frame.dimensions(), (640, 480));
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn missing_font_file_is_an_error() {
        assert!(Overlay::load(Path::new("/nonexistent/font.ttf")).is_err());
    }
}
