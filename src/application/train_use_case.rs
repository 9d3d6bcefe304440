// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate the configuration
//   Step 2: Load the line manifest        (Layer 4 - data)
//   Step 3: Split train/validation        (Layer 4 - data)
//   Step 4: Build datasets                (Layer 4 - data)
//   Step 5: Save config                   (Layer 6 - infra)
//   Step 6: Run training loop             (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::data::{
    charset::Charset,
    dataset::LineDataset,
    loader::ManifestLoader,
    preprocessor::Preprocessor,
    splitter::split_train_val,
};
use crate::domain::{line_sample::InputSize, traits::SampleSource};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    model::{CrnnConfig, OptimizerKind, DEFAULT_LEARNING_RATE},
    monitor::MonitorConfig,
    trainer::run_training,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything needed to train, and later to rebuild the network
// for inference. Saved as train_config.json in the checkpoint
// directory. Missing fields in a JSON file fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// TSV manifest: <image path>\t<transcription>
    pub manifest:        String,
    pub checkpoint_dir:  String,
    pub input_size:      InputSize,
    /// Labels are padded (or truncated) to this many characters
    pub max_text_length: usize,
    pub charset:         Charset,
    pub optimizer:       OptimizerKind,
    pub lr:              f64,
    pub batch_size:      usize,
    pub epochs:          usize,
    pub train_fraction:  f64,
    pub seed:            u64,
    pub num_workers:     usize,
    pub rnn_units:       usize,
    pub rnn_layers:      usize,
    pub rnn_dropout:     f64,
    pub monitor:         MonitorConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            manifest:        "data/lines/labels.tsv".to_string(),
            checkpoint_dir:  "checkpoints".to_string(),
            input_size:      InputSize::default(),
            max_text_length: 128,
            charset:         Charset::printable(),
            optimizer:       OptimizerKind::Adam,
            lr:              DEFAULT_LEARNING_RATE,
            batch_size:      16,
            epochs:          100,
            train_fraction:  0.9,
            seed:            42,
            num_workers:     2,
            rnn_units:       256,
            rnn_layers:      2,
            rnn_dropout:     0.5,
            monitor:         MonitorConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Read a full or partial config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config file '{}'", path.display()))
    }

    /// Network hyperparameters; d_model follows from the charset.
    pub fn model_config(&self) -> CrnnConfig {
        CrnnConfig::new(self.input_size, self.charset.num_classes())
            .with_rnn_units(self.rnn_units)
            .with_rnn_layers(self.rnn_layers)
            .with_rnn_dropout(self.rnn_dropout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.epochs == 0 {
            bail!("epochs must be at least 1");
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            bail!("learning rate must be a positive number, got {}", self.lr);
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            bail!("train_fraction must lie strictly between 0 and 1, got {}", self.train_fraction);
        }
        if self.max_text_length == 0 {
            bail!("max_text_length must be at least 1");
        }
        if self.charset.is_empty() {
            bail!("charset is empty");
        }
        if self.rnn_units == 0 || self.rnn_layers == 0 {
            bail!("rnn_units and rnn_layers must be at least 1");
        }
        if !(0.0..1.0).contains(&self.rnn_dropout) {
            bail!("rnn_dropout must lie in [0, 1), got {}", self.rnn_dropout);
        }

        // Build nothing yet, only check that the shapes work out
        let (_, sequence) = self.model_config().trace_shapes()?;
        if self.max_text_length > sequence.timesteps {
            tracing::warn!(
                "max_text_length={} exceeds the {} timesteps of the network; \
                 longer labels will have infinite loss and be skipped",
                self.max_text_length, sequence.timesteps
            );
        }
        Ok(())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Load the manifest ─────────────────────────────────────────
        tracing::info!("Loading line samples from '{}'", cfg.manifest);
        let samples: Vec<_> = ManifestLoader::new(&cfg.manifest)
            .load_all()?
            .into_iter()
            .filter(|s| !s.text.is_empty())
            .collect();
        if samples.len() < 2 {
            bail!(
                "Need at least 2 labelled lines to train, found {} in '{}'",
                samples.len(), cfg.manifest
            );
        }

        // ── Step 3: Train / validation split ──────────────────────────────────
        let (train_samples, val_samples) = split_train_val(samples, cfg.train_fraction, cfg.seed);
        if train_samples.is_empty() || val_samples.is_empty() {
            bail!(
                "train_fraction={} leaves an empty split ({} train, {} validation)",
                cfg.train_fraction, train_samples.len(), val_samples.len()
            );
        }
        tracing::info!(
            "Split: {} train, {} validation",
            train_samples.len(),
            val_samples.len()
        );

        // ── Step 4: Build Burn datasets ───────────────────────────────────────
        let preprocessor  = Preprocessor::new(cfg.input_size)?;
        let train_dataset = LineDataset::new(
            train_samples, preprocessor.clone(), cfg.charset.clone(), cfg.max_text_length,
        );
        let val_dataset = LineDataset::new(
            val_samples, preprocessor, cfg.charset.clone(), cfg.max_text_length,
        );

        // ── Step 5: Save config for inference ─────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir)?;
        ckpt_manager.save_config(cfg)?;

        // ── Step 6: Run training loop (Layer 5) ───────────────────────────────
        run_training(cfg, train_dataset, val_dataset, &ckpt_manager)
    }
}
