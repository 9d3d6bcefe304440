// ============================================================
// Layer 4 — Manifest Loader
// ============================================================
// Reads a tab-separated manifest describing a line dataset:
//
//   # comment lines and blank lines are ignored
//   lines/a01-000u-00.png<TAB>A MOVE to stop Mr. Gaitskell
//   lines/a01-000u-01.png<TAB>from nominating any more Labour
//
// Image paths are resolved relative to the manifest's own
// directory. Rows without a tab, and rows whose image file is
// missing, are skipped with a warning rather than failing the
// whole load.
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::data::preprocessor::Preprocessor;
use crate::domain::line_sample::LineSample;
use crate::domain::traits::SampleSource;

/// Loads line samples listed in a TSV manifest.
pub struct ManifestLoader {
    manifest: PathBuf,
}

impl ManifestLoader {
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self { manifest: manifest.into() }
    }
}

impl SampleSource for ManifestLoader {
    fn load_all(&self) -> Result<Vec<LineSample>> {
        let contents = fs::read_to_string(&self.manifest)
            .with_context(|| format!("Cannot read manifest '{}'", self.manifest.display()))?;
        let base_dir = self.manifest.parent().unwrap_or_else(|| Path::new("."));

        let mut samples = Vec::new();
        for sample in parse_manifest(&contents, base_dir) {
            if sample.image_path.is_file() {
                samples.push(sample);
            } else {
                tracing::warn!("Skipping missing image '{}'", sample.image_path.display());
            }
        }

        tracing::info!(
            "Loaded {} line samples from '{}'",
            samples.len(),
            self.manifest.display()
        );
        Ok(samples)
    }
}

/// Parse manifest text into samples without touching the filesystem.
pub fn parse_manifest(contents: &str, base_dir: &Path) -> Vec<LineSample> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(line_no, line)| {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                return None;
            }
            match line.split_once('\t') {
                Some((path, text)) => Some(LineSample::new(
                    base_dir.join(path.trim()),
                    Preprocessor::clean_text(text),
                )),
                None => {
                    tracing::warn!("Manifest line {} has no tab separator, skipping", line_no + 1);
                    None
                }
            }
        })
        .collect()
}
