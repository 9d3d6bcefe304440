use burn::data::dataset::Dataset;

use crate::data::{charset::Charset, preprocessor::Preprocessor};
use crate::domain::line_sample::LineSample;

/// One preprocessed training item.
/// `pixels` is [channels, height, width] flattened; `label` is
/// zero-padded to the dataset's max text length.
#[derive(Debug, Clone)]
pub struct LineItem {
    pub pixels: Vec<f32>,
    pub label:  Vec<i64>,
}

impl LineItem {
    /// Count of non-padding label entries.
    pub fn label_len(&self) -> usize {
        self.label.iter().filter(|&&i| i != 0).count()
    }
}

/// Lazily decodes line images on `get`, so only the current
/// batch is ever held in memory.
pub struct LineDataset {
    samples:         Vec<LineSample>,
    preprocessor:    Preprocessor,
    charset:         Charset,
    max_text_length: usize,
}

impl LineDataset {
    pub fn new(
        samples:         Vec<LineSample>,
        preprocessor:    Preprocessor,
        charset:         Charset,
        max_text_length: usize,
    ) -> Self {
        let too_long = samples.iter().filter(|s| s.char_len() > max_text_length).count();
        if too_long > 0 {
            tracing::warn!(
                "{} transcriptions exceed max_text_length={} and will be truncated",
                too_long, max_text_length
            );
        }
        Self { samples, preprocessor, charset, max_text_length }
    }
}

impl Dataset<LineItem> for LineDataset {
    fn get(&self, index: usize) -> Option<LineItem> {
        let sample = self.samples.get(index)?;
        // A broken file must not end the epoch early: the loader stops at
        // the first None, so substitute a blank line instead.
        let pixels = self.preprocessor.load(&sample.image_path).unwrap_or_else(|e| {
            tracing::warn!("Cannot decode '{}': {}", sample.image_path.display(), e);
            self.preprocessor.blank()
        });
        let label = self.charset.encode_padded(&sample.text, self.max_text_length);
        Some(LineItem { pixels, label })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::line_sample::InputSize;
    use image::{GrayImage, Luma};

    #[test]
    fn test_get_decodes_and_encodes() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("line.png");
        GrayImage::from_pixel(16, 4, Luma([0])).save(&path).unwrap();

        let pre = Preprocessor::new(InputSize::new(4, 16, 1)).unwrap();
        let ds  = LineDataset::new(
            vec![LineSample::new(&path, "ab")],
            pre,
            Charset::new("ab"),
            5,
        );

        let item = ds.get(0).unwrap();
        assert_eq!(item.pixels.len(), 64);
        assert!(item.pixels.iter().all(|&v| v == 0.0));
        assert_eq!(item.label, vec![2, 3, 0, 0, 0]);
        assert_eq!(item.label_len(), 2);
        assert!(ds.get(1).is_none());
    }

    #[test]
    fn test_unreadable_image_becomes_blank() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"garbage").unwrap();

        let pre = Preprocessor::new(InputSize::new(2, 2, 1)).unwrap();
        let ds  = LineDataset::new(vec![LineSample::new(&path, "a")], pre, Charset::new("a"), 2);
        let item = ds.get(0).unwrap();
        assert_eq!(item.pixels, vec![1.0; 4]);
    }
}
