// ============================================================
// Layer 3 — LineSample Domain Type
// ============================================================
// One handwritten text line: where its image lives and what
// it says. Nothing here knows about pixels or tensors — the
// data layer turns a LineSample into a LineItem for batching.
//
// Example manifest row (tab separated):
//   lines/a01-000u-00.png	A MOVE to stop Mr. Gaitskell from

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A labelled text-line image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSample {
    /// Absolute (or working-directory relative) path of the image
    pub image_path: PathBuf,

    /// Ground-truth transcription of the line
    pub text: String,
}

impl LineSample {
    pub fn new(image_path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            text:       text.into(),
        }
    }

    /// Number of characters in the transcription (not bytes).
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Logical size of one network input, in the (height, width, channels)
/// order used by the model definition. Tensors themselves are laid out
/// channels-first: [batch, channels, height, width].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSize {
    pub height:   usize,
    pub width:    usize,
    pub channels: usize,
}

impl InputSize {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self { height, width, channels }
    }

    /// Number of f32 values in one image.
    pub fn num_values(&self) -> usize {
        self.height * self.width * self.channels
    }
}

impl Default for InputSize {
    fn default() -> Self {
        // Wide line images: 1024 columns become 128 timesteps
        Self::new(128, 1024, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_len_counts_unicode_scalars() {
        let s = LineSample::new("a.png", "naïve");
        assert_eq!(s.char_len(), 5);
        assert_eq!(s.text.len(), 6);
    }

    #[test]
    fn test_input_size_num_values() {
        assert_eq!(InputSize::new(32, 128, 3).num_values(), 32 * 128 * 3);
    }
}
