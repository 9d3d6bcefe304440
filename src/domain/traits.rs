// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer programs against these traits so the
// concrete loader / recognizer can be swapped without touching
// the use cases:
//   - ManifestLoader implements SampleSource
//   - Recognizer     implements LineRecognizer
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use std::path::Path;

use crate::domain::line_sample::LineSample;

// ─── SampleSource ─────────────────────────────────────────────────────────────
/// Any component that can enumerate labelled line images.
pub trait SampleSource {
    /// Load every available sample from this source.
    fn load_all(&self) -> Result<Vec<LineSample>>;
}

// ─── Transcription ────────────────────────────────────────────────────────────
/// A decoded line with the mean per-timestep confidence of the
/// greedy path, in [0.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text:       String,
    pub confidence: f32,
}

// ─── LineRecognizer ───────────────────────────────────────────────────────────
/// Any component that turns a line image into text.
pub trait LineRecognizer {
    fn transcribe(&self, image_path: &Path) -> Result<Transcription>;

    /// Transcribe several images; stops at the first failure.
    fn transcribe_all(&self, image_paths: &[&Path]) -> Result<Vec<Transcription>> {
        image_paths.iter().map(|p| self.transcribe(p)).collect()
    }
}
