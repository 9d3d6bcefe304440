// ============================================================
// Layer 2 — Predict Use Case
// ============================================================
// Transcribes line images with a trained recognizer:
//   1. Rebuild the recognizer from the checkpoint directory
//   2. Transcribe the given images in batches
//   3. Optionally score a labelled manifest (CER / WER)
//
// Works against the LineRecognizer trait, so any recognizer
// can be plugged in.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::domain::traits::{LineRecognizer, SampleSource, Transcription};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{character_error_rate, word_error_rate},
};
use crate::ml::inferencer::Recognizer;

/// Images per forward pass.
const PREDICT_BATCH: usize = 16;

/// Error rates of a recognizer over a labelled set of lines.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub lines: usize,
    pub cer:   f64,
    pub wer:   f64,
}

pub struct PredictUseCase<R: LineRecognizer> {
    recognizer: R,
}

impl PredictUseCase<Recognizer> {
    pub fn from_checkpoint(checkpoint_dir: &str) -> Result<Self> {
        let ckpt = CheckpointManager::open(checkpoint_dir)?;
        Ok(Self::new(Recognizer::from_checkpoint(&ckpt)?))
    }
}

impl<R: LineRecognizer> PredictUseCase<R> {
    pub fn new(recognizer: R) -> Self {
        Self { recognizer }
    }

    /// One transcription per image, in input order.
    pub fn predict(&self, images: &[PathBuf]) -> Result<Vec<(PathBuf, Transcription)>> {
        let mut out = Vec::with_capacity(images.len());
        for chunk in images.chunks(PREDICT_BATCH) {
            let paths: Vec<&Path> = chunk.iter().map(PathBuf::as_path).collect();
            let texts = self.recognizer.transcribe_all(&paths)?;
            out.extend(chunk.iter().cloned().zip(texts));
        }
        Ok(out)
    }

    /// Transcribe every line of `source` and compare with its labels.
    pub fn evaluate(&self, source: &impl SampleSource) -> Result<EvaluationReport> {
        let samples = source.load_all()?;
        let images: Vec<PathBuf> = samples.iter().map(|s| s.image_path.clone()).collect();

        let predictions: Vec<String> = self
            .predict(&images)?
            .into_iter()
            .map(|(_, t)| t.text)
            .collect();
        let references: Vec<String> = samples.into_iter().map(|s| s.text).collect();

        let report = EvaluationReport {
            lines: references.len(),
            cer:   character_error_rate(&predictions, &references),
            wer:   word_error_rate(&predictions, &references),
        };
        tracing::info!(
            "Evaluated {} lines: CER={:.2}% WER={:.2}%",
            report.lines, report.cer * 100.0, report.wer * 100.0
        );
        Ok(report)
    }
}
