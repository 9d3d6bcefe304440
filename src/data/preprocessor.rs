// ============================================================
// Layer 4 — Line Preprocessor
// ============================================================
// Turns a decoded line image into the flat, channels-first
// f32 buffer a LineBatch is stacked from, and normalises the
// transcription text.
//
// Image steps (applied in order):
//   1. Convert to the configured channel count (1 = gray, 3 = RGB)
//   2. Resize, keeping the aspect ratio, so the line fits inside
//      (height, width) — never upscaled past the target box
//   3. Paste at the top-left of a white (height, width) canvas
//   4. Scale pixel values from [0, 255] to [0.0, 1.0]
//   5. Emit in [channels, height, width] order
//
// Text steps:
//   1. Map tabs / control characters to spaces
//   2. Collapse runs of spaces and trim
//
// Reference: image crate documentation (imageops)

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use std::path::Path;

use crate::domain::error::{HtrError, HtrResult};
use crate::domain::line_sample::InputSize;

const WHITE: u8 = 255;

#[derive(Debug, Clone)]
pub struct Preprocessor {
    input_size: InputSize,
}

impl Preprocessor {
    /// Only 1 (grayscale) and 3 (RGB) channel inputs are supported.
    pub fn new(input_size: InputSize) -> HtrResult<Self> {
        if input_size.channels != 1 && input_size.channels != 3 {
            return Err(HtrError::Config(format!(
                "unsupported channel count {} (expected 1 or 3)",
                input_size.channels
            )));
        }
        if input_size.height == 0 || input_size.width == 0 {
            return Err(HtrError::shape(format!(
                "input size must be non-empty, got {}x{}",
                input_size.height, input_size.width
            )));
        }
        Ok(Self { input_size })
    }

    pub fn input_size(&self) -> InputSize {
        self.input_size
    }

    /// Decode the image at `path` and preprocess it.
    pub fn load(&self, path: &Path) -> HtrResult<Vec<f32>> {
        let img = image::open(path)?;
        Ok(self.process(&img))
    }

    /// An all-white input, used in place of unreadable images.
    pub fn blank(&self) -> Vec<f32> {
        vec![1.0; self.input_size.num_values()]
    }

    pub fn process(&self, img: &DynamicImage) -> Vec<f32> {
        let InputSize { height, width, channels } = self.input_size;
        let (new_w, new_h) = fit_within(img.width(), img.height(), width as u32, height as u32);
        let resized = img.resize_exact(new_w, new_h, FilterType::Triangle);

        if channels == 1 {
            let mut canvas = GrayImage::from_pixel(width as u32, height as u32, Luma([WHITE]));
            imageops::overlay(&mut canvas, &resized.to_luma8(), 0, 0);
            canvas.pixels().map(|p| p.0[0] as f32 / 255.0).collect()
        } else {
            let mut canvas = RgbImage::from_pixel(width as u32, height as u32, Rgb([WHITE; 3]));
            imageops::overlay(&mut canvas, &resized.to_rgb8(), 0, 0);
            // interleaved HWC → planar CHW
            let mut out = vec![0.0f32; self.input_size.num_values()];
            let plane   = height * width;
            for (i, p) in canvas.pixels().enumerate() {
                for c in 0..3 {
                    out[c * plane + i] = p.0[c] as f32 / 255.0;
                }
            }
            out
        }
    }

    /// Normalise whitespace in a transcription.
    pub fn clean_text(text: &str) -> String {
        let mapped: String = text
            .chars()
            .map(|c| if c == '\t' || c.is_control() || c == '\u{00A0}' { ' ' } else { c })
            .collect();
        mapped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Largest (w, h) with the source aspect ratio that fits in the target box.
/// Images already smaller than the box are left at their size.
fn fit_within(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let src_w = src_w.max(1);
    let src_h = src_h.max(1);
    let scale = (max_w as f64 / src_w as f64)
        .min(max_h as f64 / src_h as f64)
        .min(1.0);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, max_h);
    (w, h)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn gray(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, Luma([v])))
    }

    #[test]
    fn test_rejects_unsupported_channels() {
        assert!(Preprocessor::new(InputSize::new(32, 128, 2)).is_err());
        assert!(Preprocessor::new(InputSize::new(0, 128, 1)).is_err());
    }

    #[test]
    fn test_fit_within_keeps_aspect() {
        assert_eq!(fit_within(400, 100, 128, 32), (128, 32));
        assert_eq!(fit_within(200, 100, 128, 32), (64, 32));
        // Never upscale
        assert_eq!(fit_within(10, 5, 128, 32), (10, 5));
    }

    #[test]
    fn test_process_pads_with_white() {
        let pre = Preprocessor::new(InputSize::new(4, 8, 1)).unwrap();
        let out = pre.process(&gray(2, 2, 0));
        assert_eq!(out.len(), 32);
        // Top-left 2x2 is black, everything else white
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.0);
        assert_eq!(out[8], 0.0);
        assert_eq!(out[2], 1.0);
        assert_eq!(out[31], 1.0);
    }

    #[test]
    fn test_process_rgb_is_channels_first() {
        let pre = Preprocessor::new(InputSize::new(2, 2, 3)).unwrap();
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([255, 0, 0])));
        let out = pre.process(&img);
        assert_eq!(out.len(), 12);
        assert!(out[0..4].iter().all(|&v| v == 1.0));  // red plane
        assert!(out[4..12].iter().all(|&v| v == 0.0)); // green + blue planes
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(Preprocessor::clean_text("  a\tb \u{00A0} c \n"), "a b c");
    }
}
