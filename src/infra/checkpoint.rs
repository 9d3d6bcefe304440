// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// What lives in the checkpoint directory:
//   1. <name>.mpk.gz       best weights so far (val_loss)
//   2. best_epoch.json     which epoch produced them, and its val_loss
//   3. train_config.json   architecture, charset and hyperparameters
//
// Only the best weights are kept. A later epoch overwrites them
// only when its validation loss improves, so after training the
// file always holds the best model seen.
//
// The config is needed at inference time to rebuild exactly the
// same network (input size, class count) before loading weights.
//
// File layout:
//   checkpoints/
//     checkpoint_weights.mpk.gz
//     best_epoch.json
//     train_config.json
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::Crnn;

const CONFIG_FILE: &str = "train_config.json";
const BEST_EPOCH_FILE: &str = "best_epoch.json";

/// Which epoch the saved weights come from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub epoch:    usize,
    pub val_loss: f64,
}

/// Manages saving and loading of model checkpoints.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Open an existing checkpoint directory for reading.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            anyhow::bail!(
                "Checkpoint directory '{}' not found. Have you run 'train' first?",
                dir.display()
            );
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record the weights of `model` under `name`, replacing any older file.
    pub fn save_weights<B: Backend>(&self, model: &Crnn<B>, name: &str, best: BestRecord) -> Result<()> {
        // The recorder appends its own extension
        let path = self.dir.join(name);

        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        fs::write(self.dir.join(BEST_EPOCH_FILE), serde_json::to_string(&best)?)
            .with_context(|| format!("Failed to write {BEST_EPOCH_FILE}"))?;

        tracing::debug!("Saved checkpoint '{}' from epoch {}", name, best.epoch);
        Ok(())
    }

    /// Load the weights saved under `name` into `model`.
    /// The architecture must match the one that was saved.
    pub fn load_weights<B: Backend>(
        &self,
        model:  Crnn<B>,
        name:   &str,
        device: &B::Device,
    ) -> Result<Crnn<B>> {
        let path = self.dir.join(name);

        match self.best_record() {
            Ok(best) => tracing::info!(
                "Loading checkpoint '{}' (epoch {}, val_loss={:.4})",
                name, best.epoch, best.val_loss
            ),
            Err(_) => tracing::info!("Loading checkpoint '{}'", name),
        }

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Have you trained the model first?",
                    path.display())
            })?;

        Ok(model.load_record(record))
    }

    pub fn best_record(&self) -> Result<BestRecord> {
        let path = self.dir.join(BEST_EPOCH_FILE);
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot find '{}'", path.display()))?;
        Ok(serde_json::from_str(&s)?)
    }

    /// Save the training configuration to JSON.
    /// Must happen before training so inference can rebuild the model.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);

        let json = fs::read_to_string(&path)
            .with_context(|| {
                format!(
                    "Cannot read config from '{}'. \
                     Make sure you have run 'train' before 'predict'.",
                    path.display()
                )
            })?;

        serde_json::from_str(&json)
            .with_context(|| format!("Malformed training config '{}'", path.display()))
    }
}
