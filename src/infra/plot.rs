// ============================================================
// Layer 6 — Training Curves
// ============================================================
// Renders the per-batch training and validation series that
// BatchStats collects into a PNG line chart.
//
//   x axis   training steps 0 .. n_train − 1
//            validation point i sits at
//              linspace(0, n_train, n_val)[i]
//            so both curves span the same run
//   y axis   from 0 up to the largest finite value
//   legend   upper right for "loss", lower right otherwise
//   labels   title-cased ("training steps" → "Training Steps")
//
// Text uses the bundled DejaVu Sans unless another TrueType
// font is passed in.
//
// Reference: imageproc drawing API, ab_glyph fonts

use anyhow::{Context, Result};
use std::path::Path;
use ab_glyph::{FontArc, FontVec};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;
const MARGIN_LEFT: f32 = 70.0;
const MARGIN_RIGHT: f32 = 20.0;
const MARGIN_TOP: f32 = 20.0;
const MARGIN_BOTTOM: f32 = 60.0;
const TICKS: usize = 5;
const FONT_SCALE: f32 = 16.0;

static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const TRAINING_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
pub const VALIDATION_COLOR: Rgb<u8> = Rgb([255, 127, 14]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegendCorner {
    UpperRight,
    LowerRight,
}

/// Python-style `str.title()`: each run of letters starts upper case.
pub fn title_case(s: &str) -> String {
    let mut out  = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Data-space extent of the chart and where its labels go.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartLayout {
    pub x_max:   f64,
    pub y_max:   f64,
    pub x_label: String,
    pub y_label: String,
    pub legend:  LegendCorner,
}

impl ChartLayout {
    pub fn new(training: &[f64], validation: &[f64], x_label: &str, stats: &str) -> Self {
        let train_len = training.len();
        let mut x_max = train_len.saturating_sub(1) as f64;
        if !validation.is_empty() {
            x_max = x_max.max(train_len as f64);
        }

        let y_max = training
            .iter()
            .chain(validation)
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0_f64, f64::max);

        let legend = if stats.eq_ignore_ascii_case("loss") { LegendCorner::UpperRight } else { LegendCorner::LowerRight };

        Self {
            x_max:   if x_max > 0.0 { x_max } else { 1.0 },
            y_max:   if y_max > 0.0 { y_max } else { 1.0 },
            x_label: title_case(x_label),
            y_label: title_case(stats),
            legend,
        }
    }

    /// x coordinate of validation point `index` out of `count`.
    pub fn validation_x(train_len: usize, index: usize, count: usize) -> f64 {
        if count <= 1 {
            return 0.0;
        }
        train_len as f64 * index as f64 / (count - 1) as f64
    }

    /// Map a data point to pixel coordinates.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f32, f32) {
        let plot_w = WIDTH as f32 - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = HEIGHT as f32 - MARGIN_TOP - MARGIN_BOTTOM;
        let px = MARGIN_LEFT + (x / self.x_max) as f32 * plot_w;
        let py = MARGIN_TOP + plot_h - (y.max(0.0) / self.y_max) as f32 * plot_h;
        (px, py)
    }
}

/// The font used when no other one is given.
pub fn default_font() -> Result<FontArc> {
    let font = FontVec::try_from_vec(DEFAULT_FONT.to_vec())
        .context("Bundled DejaVu Sans failed to parse")?;
    Ok(FontArc::new(font))
}

/// Load a TrueType / OpenType font from disk.
pub fn load_font(path: &Path) -> Result<FontArc> {
    let data = std::fs::read(path)
        .with_context(|| format!("Cannot read font '{}'", path.display()))?;
    let font = FontVec::try_from_vec(data)
        .with_context(|| format!("Failed to parse font file: {}", path.display()))?;
    Ok(FontArc::new(font))
}

/// Draw the training and validation curves of one statistic
/// (`stats`, e.g. "loss") and save the chart as an image.
pub fn plot_stats(
    training:   &[f64],
    validation: &[f64],
    x_label:    &str,
    stats:      &str,
    output:     &Path,
    font:       &FontArc,
) -> Result<()> {
    let img = render_stats(training, validation, x_label, stats, font);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    img.save(output)
        .with_context(|| format!("Cannot write plot to '{}'", output.display()))?;
    tracing::info!("Saved {} plot to '{}'", title_case(stats), output.display());
    Ok(())
}

pub fn render_stats(
    training:   &[f64],
    validation: &[f64],
    x_label:    &str,
    stats:      &str,
    font:       &FontArc,
) -> RgbImage {
    let layout  = ChartLayout::new(training, validation, x_label, stats);
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);

    draw_axes(&mut img, &layout, font);

    let train_points: Vec<(f64, f64)> = training
        .iter()
        .enumerate()
        .map(|(i, &y)| (i as f64, y))
        .collect();
    let val_points: Vec<(f64, f64)> = validation
        .iter()
        .enumerate()
        .map(|(i, &y)| (ChartLayout::validation_x(training.len(), i, validation.len()), y))
        .collect();

    draw_series(&mut img, &layout, &train_points, TRAINING_COLOR);
    draw_series(&mut img, &layout, &val_points, VALIDATION_COLOR);

    let entries = [
        (format!("Training {}", layout.y_label), TRAINING_COLOR),
        (format!("Validation {}", layout.y_label), VALIDATION_COLOR),
    ];
    draw_legend(&mut img, &layout, &entries, font);
    img
}

fn draw_series(img: &mut RgbImage, layout: &ChartLayout, points: &[(f64, f64)], color: Rgb<u8>) {
    // Non-finite values break the line instead of dragging it off the chart
    for pair in points.windows(2) {
        let [(x0, y0), (x1, y1)] = [pair[0], pair[1]];
        if y0.is_finite() && y1.is_finite() {
            draw_line_segment_mut(img, layout.to_pixel(x0, y0), layout.to_pixel(x1, y1), color);
        }
    }
    if let [(x, y)] = points {
        if y.is_finite() {
            let (px, py) = layout.to_pixel(*x, *y);
            draw_filled_rect_mut(img, Rect::at(px as i32 - 2, py as i32 - 2).of_size(5, 5), color);
        }
    }
}

fn draw_axes(img: &mut RgbImage, layout: &ChartLayout, font: &FontArc) {
    let origin = layout.to_pixel(0.0, 0.0);
    let x_end  = layout.to_pixel(layout.x_max, 0.0);
    let y_end  = layout.to_pixel(0.0, layout.y_max);
    draw_line_segment_mut(img, origin, x_end, AXIS_COLOR);
    draw_line_segment_mut(img, origin, y_end, AXIS_COLOR);

    for i in 0..=TICKS {
        let t = i as f64 / TICKS as f64;

        let (x, y) = layout.to_pixel(t * layout.x_max, 0.0);
        draw_line_segment_mut(img, (x, y), (x, y + 5.0), AXIS_COLOR);
        let label = format!("{:.0}", t * layout.x_max);
        draw_text_mut(img, AXIS_COLOR, x as i32 - 8, y as i32 + 8, FONT_SCALE, font, &label);

        let (x, y) = layout.to_pixel(0.0, t * layout.y_max);
        draw_line_segment_mut(img, (x - 5.0, y), (x, y), AXIS_COLOR);
        let label = format!("{:.2}", t * layout.y_max);
        draw_text_mut(img, AXIS_COLOR, 4, y as i32 - 8, FONT_SCALE, font, &label);
    }

    let (cx, _) = layout.to_pixel(layout.x_max / 2.0, 0.0);
    draw_text_mut(
        img, AXIS_COLOR, cx as i32 - 40, HEIGHT as i32 - 24, FONT_SCALE, font, &layout.x_label,
    );
    draw_text_mut(img, AXIS_COLOR, 4, 2, FONT_SCALE, font, &layout.y_label);
}

fn draw_legend(
    img:     &mut RgbImage,
    layout:  &ChartLayout,
    entries: &[(String, Rgb<u8>)],
    font:    &FontArc,
) {
    let box_w = 200u32;
    let box_h = 12 + 22 * entries.len() as u32;
    let x = WIDTH as i32 - MARGIN_RIGHT as i32 - box_w as i32 - 10;
    let y = match layout.legend {
        LegendCorner::UpperRight => MARGIN_TOP as i32 + 10,
        LegendCorner::LowerRight => HEIGHT as i32 - MARGIN_BOTTOM as i32 - box_h as i32 - 10,
    };

    let frame = Rect::at(x, y).of_size(box_w, box_h);
    draw_filled_rect_mut(img, frame, BACKGROUND);
    draw_hollow_rect_mut(img, frame, AXIS_COLOR);

    for (row, (label, color)) in entries.iter().enumerate() {
        let ly = y + 8 + 22 * row as i32;
        draw_filled_rect_mut(img, Rect::at(x + 8, ly + 6).of_size(24, 3), *color);
        draw_text_mut(img, AXIS_COLOR, x + 40, ly, FONT_SCALE, font, label);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("training steps"), "Training Steps");
        assert_eq!(title_case("loss"), "Loss");
        assert_eq!(title_case("val_ACC"), "Val_Acc");
    }

    #[test]
    fn test_legend_corner() {
        assert_eq!(ChartLayout::new(&[1.0], &[], "steps", "loss").legend, LegendCorner::UpperRight);
        assert_eq!(ChartLayout::new(&[1.0], &[], "steps", "accuracy").legend, LegendCorner::LowerRight);
    }

    #[test]
    fn test_validation_points_span_training_steps() {
        // linspace(0, 10, 3) = [0, 5, 10]
        assert_eq!(ChartLayout::validation_x(10, 0, 3), 0.0);
        assert_eq!(ChartLayout::validation_x(10, 1, 3), 5.0);
        assert_eq!(ChartLayout::validation_x(10, 2, 3), 10.0);
        assert_eq!(ChartLayout::validation_x(10, 0, 1), 0.0);
    }

    #[test]
    fn test_layout_extent() {
        let layout = ChartLayout::new(&[4.0, 3.0, f64::INFINITY], &[5.0], "steps", "loss");
        assert_eq!(layout.y_max, 5.0);
        assert_eq!(layout.x_max, 3.0);
        // y is floored at 0 at the bottom of the plot area
        let (_, bottom) = layout.to_pixel(0.0, 0.0);
        assert_eq!(bottom, HEIGHT as f32 - MARGIN_BOTTOM);
        let (_, top) = layout.to_pixel(0.0, 5.0);
        assert_eq!(top, MARGIN_TOP);
    }

    #[test]
    fn test_empty_series_do_not_panic() {
        let layout = ChartLayout::new(&[], &[], "steps", "loss");
        assert_eq!((layout.x_max, layout.y_max), (1.0, 1.0));
        let img = render_stats(&[], &[], "steps", "loss", &default_font().unwrap());
        assert_eq!(img.dimensions(), (WIDTH, HEIGHT));
    }

    #[test]
    fn test_plot_stats_writes_png_with_both_curves() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("plots").join("loss.png");
        let training: Vec<f64> = (0..50).map(|i| 10.0 / (i as f64 + 1.0)).collect();
        let validation = [6.0, 3.0, 1.0];

        let font = default_font().unwrap();
        plot_stats(&training, &validation, "training steps", "loss", &path, &font).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (WIDTH, HEIGHT));
        assert!(img.pixels().any(|p| *p == TRAINING_COLOR));
        assert!(img.pixels().any(|p| *p == VALIDATION_COLOR));
    }

    #[test]
    fn test_labels_and_legend_text_drawn_without_font_flag() {
        let font = default_font().unwrap();
        let img  = render_stats(&[3.0, 2.0, 1.0], &[2.5, 1.5], "training steps", "loss", &font);
        let inked = |x0: u32, y0: u32, x1: u32, y1: u32| {
            (y0..y1).any(|y| (x0..x1).any(|x| *img.get_pixel(x, y) != BACKGROUND))
        };

        // x axis title sits below the tick labels
        assert!(inked(0, HEIGHT - 24, WIDTH, HEIGHT));
        // y axis title in the top-left corner
        assert!(inked(0, 0, MARGIN_LEFT as u32, MARGIN_TOP as u32));
        // legend text right of the colour swatches, upper right for loss
        let legend_x = WIDTH - MARGIN_RIGHT as u32 - 200 - 10 + 40;
        let legend_y = MARGIN_TOP as u32 + 10 + 8;
        assert!(inked(legend_x, legend_y, legend_x + 150, legend_y + 40));
    }
}
