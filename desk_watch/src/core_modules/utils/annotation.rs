// THEORY:
// The `annotation` module is the single drawing stage of the crate. The live
// preview and the saved snapshots both go through `Annotator::annotate`, which
// always returns a new image and never writes into the caller's frame.
//
// Label text needs a font. The crate does not bundle one; when no font is
// configured only the box outlines are drawn.

use crate::core_modules::detection::Detection;
use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const TEXT_SCALE: f32 = 16.0;
/// Gap between the box edge and the label tab.
const LABEL_MARGIN: i32 = 10;
/// Padding around the label text inside the tab.
const LABEL_PADDING: i32 = 5;

#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
    scale: PxScale,
    box_color: Rgb<u8>,
    text_color: Rgb<u8>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            scale: PxScale::from(TEXT_SCALE),
            box_color: BOX_COLOR,
            text_color: TEXT_COLOR,
        }
    }
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("has_font", &self.font.is_some())
            .field("scale", &self.scale)
            .finish()
    }
}

impl Annotator {
    pub fn with_font(font: FontArc) -> Self {
        Self {
            font: Some(font),
            ..Self::default()
        }
    }

    /// Loads a TrueType/OpenType font for label text.
    pub fn with_font_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font file {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("failed to parse font file {}", path.display()))?;
        Ok(Self::with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draws every detection onto a copy of `frame`.
    pub fn annotate(&self, frame: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut output = frame.clone();
        for detection in detections {
            self.draw_detection(&mut output, detection);
        }
        output
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let (width, height) = canvas.dimensions();
        let Some(region) = detection.bbox.to_region(width, height) else {
            return;
        };
        let x1 = region.x as i32;
        let y1 = region.y as i32;

        // --- 1. Label tab, above the box or just inside it at the top edge ---
        if let Some(font) = &self.font {
            let text = format!("{} {:.2}", detection.label, detection.confidence);
            let (text_w, text_h) = text_size(self.scale, font, &text);
            let text_h = text_h as i32;
            let label_y = if y1 - LABEL_MARGIN > text_h {
                y1 - LABEL_MARGIN
            } else {
                y1 + text_h + LABEL_MARGIN
            };
            let tab_top = label_y - text_h - LABEL_PADDING;
            let tab = Rect::at(x1, tab_top).of_size(text_w.max(1), (text_h + LABEL_PADDING) as u32);
            draw_filled_rect_mut(canvas, tab, self.box_color);
            draw_text_mut(
                canvas,
                self.text_color,
                x1,
                tab_top + LABEL_PADDING / 2,
                self.scale,
                font,
                &text,
            );
        }

        // --- 2. Box outline ---
        for inset in 0..BOX_THICKNESS {
            let w = region.width.saturating_sub(2 * inset);
            let h = region.height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at(x1 + inset as i32, y1 + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(canvas, rect, self.box_color);
        }
    }
}
