// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Loads the saved config + best weights and transcribes line
// images:
//
//   image file → Preprocessor → [1, C, H, W]
//             → Crnn::forward → [1, T, classes]
//             → GreedyDecoder → class indices
//             → Charset::decode → text
//
// Several images are stacked into one batch by transcribe_all.
use anyhow::{Context, Result};
use std::path::Path;
use burn::{
    backend::{wgpu::WgpuDevice, Wgpu},
    prelude::*,
    tensor::TensorData,
};

use crate::data::{charset::Charset, preprocessor::Preprocessor};
use crate::domain::traits::{LineRecognizer, Transcription};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{decoder::GreedyDecoder, model::Crnn};

pub type InferBackend = Wgpu;

pub struct Recognizer<B: Backend = InferBackend> {
    model:        Crnn<B>,
    preprocessor: Preprocessor,
    charset:      Charset,
    decoder:      GreedyDecoder,
    device:       B::Device,
}

impl Recognizer<InferBackend> {
    /// Rebuild the trained network on the default WGPU device.
    pub fn from_checkpoint(ckpt_manager: &CheckpointManager) -> Result<Self> {
        Self::load(ckpt_manager, WgpuDevice::default())
    }
}

impl<B: Backend> Recognizer<B> {
    pub fn load(ckpt_manager: &CheckpointManager, device: B::Device) -> Result<Self> {
        let cfg = ckpt_manager.load_config()?;

        // Dropout is inactive outside autodiff, so the saved rate is harmless
        let model = cfg
            .model_config()
            .init::<B>(&device)
            .context("Saved config describes an invalid network")?;
        let model = ckpt_manager.load_weights(model, &cfg.monitor.checkpoint_name, &device)?;
        tracing::info!("Model loaded from checkpoint");

        let preprocessor = Preprocessor::new(cfg.input_size)?;
        Ok(Self::new(model, preprocessor, cfg.charset, device))
    }

    pub fn new(model: Crnn<B>, preprocessor: Preprocessor, charset: Charset, device: B::Device) -> Self {
        let decoder = GreedyDecoder::new(charset.blank_index());
        Self { model, preprocessor, charset, decoder, device }
    }

    /// Run already-preprocessed images (each C*H*W values) through the model.
    pub fn transcribe_pixels(&self, images: Vec<Vec<f32>>) -> Result<Vec<Transcription>> {
        let size  = self.preprocessor.input_size();
        let batch = images.len();
        if batch == 0 {
            return Ok(Vec::new());
        }

        let pixels: Vec<f32> = images.into_iter().flatten().collect();
        let input = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch, size.channels, size.height, size.width]),
            &self.device,
        );

        let probs = self.model.try_forward(input)?;
        Ok(self
            .decoder
            .decode_batch(probs)
            .into_iter()
            .map(|path| Transcription {
                text:       self.charset.decode(&path.indices),
                confidence: path.confidence,
            })
            .collect())
    }
}

impl<B: Backend> LineRecognizer for Recognizer<B> {
    fn transcribe(&self, image_path: &Path) -> Result<Transcription> {
        let mut out = self.transcribe_all(&[image_path])?;
        out.pop().context("model returned no transcription")
    }

    fn transcribe_all(&self, image_paths: &[&Path]) -> Result<Vec<Transcription>> {
        let images = image_paths
            .iter()
            .map(|p| {
                self.preprocessor
                    .load(p)
                    .with_context(|| format!("Cannot read line image '{}'", p.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.transcribe_pixels(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{GrayImage, Luma};

    use crate::domain::line_sample::InputSize;
    use crate::ml::model::CrnnConfig;

    type TestBackend = NdArray<f32>;

    fn recognizer() -> Recognizer<TestBackend> {
        let device  = Default::default();
        let size    = InputSize::new(32, 64, 1);
        let charset = Charset::new("ab");
        let model   = CrnnConfig::new(size, charset.num_classes())
            .with_rnn_units(8)
            .init::<TestBackend>(&device)
            .unwrap();
        Recognizer::new(model, Preprocessor::new(size).unwrap(), charset, device)
    }

    #[test]
    fn test_transcribe_all_returns_one_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let a   = dir.path().join("a.png");
        let b   = dir.path().join("b.png");
        GrayImage::from_pixel(100, 20, Luma([0])).save(&a).unwrap();
        GrayImage::from_pixel(40, 40, Luma([255])).save(&b).unwrap();

        let out = recognizer().transcribe_all(&[a.as_path(), b.as_path()]).unwrap();
        assert_eq!(out.len(), 2);
        for t in &out {
            assert!(t.confidence > 0.0 && t.confidence <= 1.0);
            assert!(t.text.chars().all(|c| c == 'a' || c == 'b' || c == '\u{FFFD}'));
        }
    }

    #[test]
    fn test_transcribe_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(recognizer().transcribe(&dir.path().join("missing.png")).is_err());
    }

    #[test]
    fn test_empty_batch() {
        assert!(recognizer().transcribe_pixels(Vec::new()).unwrap().is_empty());
    }
}
