// ============================================================
// Layer 4 — Line Batcher
// ============================================================
// Implements Burn's Batcher trait to stack Vec<LineItem> into
// the two tensors the model and the CTC loss consume.
//
//   Input:  N LineItems, each C*H*W pixels + L padded labels
//   Output: LineBatch
//             images  [N, C, H, W]  (Float)
//             targets [N, L]        (Int, 0 = padding)
//
// Every item is already the same size (fixed input_size and
// max_text_length), so batching is a flatten + reshape.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::LineItem;
use crate::domain::line_sample::InputSize;

// ─── LineBatch ────────────────────────────────────────────────────────────────
/// A batch of line images with their padded label sequences.
#[derive(Debug, Clone)]
pub struct LineBatch<B: Backend> {
    /// Pixel values — shape: [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,

    /// Padded class indices — shape: [batch_size, max_text_length]
    pub targets: Tensor<B, 2, Int>,
}

// ─── LineBatcher ──────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct LineBatcher {
    input_size: InputSize,
}

impl LineBatcher {
    pub fn new(input_size: InputSize) -> Self {
        Self { input_size }
    }
}

impl<B: Backend> Batcher<B, LineItem, LineBatch<B>> for LineBatcher {
    fn batch(&self, items: Vec<LineItem>, device: &B::Device) -> LineBatch<B> {
        let batch_size = items.len();
        let max_len    = items.first().map(|i| i.label.len()).unwrap_or(0);
        let InputSize { height, width, channels } = self.input_size;

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|item| item.pixels.iter().copied())
            .collect();

        let labels: Vec<i64> = items
            .iter()
            .flat_map(|item| item.label.iter().copied())
            .collect();

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, channels, height, width]),
            device,
        );
        let targets = Tensor::<B, 2, Int>::from_data(
            TensorData::new(labels, [batch_size, max_len]),
            device,
        );

        LineBatch { images, targets }
    }
}
