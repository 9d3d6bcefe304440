// ============================================================
// Layer 6 — Metrics
// ============================================================
// Two CSV records of a training run, plus the error-rate
// helpers both of them are built on.
//
// 1. metrics.csv — one row per epoch (MetricsLogger)
//
//      epoch,train_loss,val_loss,cer,wer,learning_rate
//      1,41.203114,38.771020,0.982311,1.000000,0.000300
//      2,29.870457,27.401193,0.734109,0.995021,0.000300
//
// 2. batch_stats.csv — one row per batch (BatchStats)
//
//      phase,step,loss,accuracy
//      train,0,44.120300,0.000000
//      val,0,39.004118,0.031250
//
//    This is what the `plot` command reads back to draw the
//    training and validation curves.
//
// Error rates are edit distances normalised by reference length:
//   CER = Σ lev(pred_chars, ref_chars) / Σ |ref_chars|
//   WER = Σ lev(pred_words, ref_words) / Σ |ref_words|
// Accuracy on a batch is max(0, 1 − CER) over class indices.
//
// How to read the metrics:
//   - val_loss rising while train_loss falls → overfitting
//   - CER falls well before WER does; a single wrong character
//     is enough to make the whole word wrong
//
// Reference: Levenshtein (1966), Rust Book §12 (I/O)

use anyhow::{bail, Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

// ─── Error rates ──────────────────────────────────────────────────────────────

/// Edit distance (insertions, deletions, substitutions all cost 1).
pub fn levenshtein<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, x) in a.iter().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let above = row[j + 1];
            let cost = if x == y { diag } else { 1 + diag.min(above).min(row[j]) };
            row[j + 1] = cost;
            diag = above;
        }
    }
    row[b.len()]
}

fn error_rate<T: PartialEq>(pairs: impl Iterator<Item = (Vec<T>, Vec<T>)>) -> f64 {
    let (mut errors, mut total, mut predicted) = (0usize, 0usize, 0usize);
    for (pred, reference) in pairs {
        errors    += levenshtein(&pred, &reference);
        total     += reference.len();
        predicted += pred.len();
    }
    match total {
        0 if predicted == 0 => 0.0,
        0 => 1.0,
        n => errors as f64 / n as f64,
    }
}

/// Character error rate over a set of transcriptions.
pub fn character_error_rate(predictions: &[String], references: &[String]) -> f64 {
    error_rate(
        predictions
            .iter()
            .zip(references)
            .map(|(p, r)| (p.chars().collect(), r.chars().collect())),
    )
}

/// Word error rate; words are whitespace separated.
pub fn word_error_rate(predictions: &[String], references: &[String]) -> f64 {
    error_rate(
        predictions
            .iter()
            .zip(references)
            .map(|(p, r)| (p.split_whitespace().collect(), r.split_whitespace().collect())),
    )
}

/// 1 − CER over raw class-index sequences, floored at 0.
pub fn label_accuracy(predicted: &[Vec<usize>], references: &[Vec<usize>]) -> f64 {
    let cer = error_rate(predicted.iter().cloned().zip(references.iter().cloned()));
    (1.0 - cer).max(0.0)
}

// ─── Epoch metrics ────────────────────────────────────────────────────────────

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Mean CTC loss over the finite training batches
    pub train_loss: f64,

    /// Mean CTC loss over the finite validation batches
    pub val_loss: f64,

    /// Character error rate on the validation set, greedy decoding
    pub cer: f64,

    /// Word error rate on the validation set
    pub wer: f64,

    /// Learning rate used during this epoch
    pub learning_rate: f64,
}

impl EpochMetrics {
    pub fn new(
        epoch:         usize,
        train_loss:    f64,
        val_loss:      f64,
        cer:           f64,
        wer:           f64,
        learning_rate: f64,
    ) -> Self {
        Self { epoch, train_loss, val_loss, cer, wer, learning_rate }
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the log directory and write the CSV header if the file is new.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create log directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");

        // Appending across runs keeps the history of resumed trainings
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,train_loss,val_loss,cer,wer,learning_rate")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6e}",
            m.epoch, m.train_loss, m.val_loss, m.cer, m.wer, m.learning_rate,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch, m.train_loss, m.val_loss,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Batch statistics ─────────────────────────────────────────────────────────

/// Per-batch loss and accuracy for the training and validation phases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub batch_losses:     Vec<f64>,
    pub batch_acc:        Vec<f64>,
    pub batch_val_losses: Vec<f64>,
    pub batch_val_acc:    Vec<f64>,
}

const BATCH_STATS_HEADER: &str = "phase,step,loss,accuracy";

impl BatchStats {
    pub fn record_train(&mut self, loss: f64, accuracy: f64) {
        self.batch_losses.push(loss);
        self.batch_acc.push(accuracy);
    }

    pub fn record_val(&mut self, loss: f64, accuracy: f64) {
        self.batch_val_losses.push(loss);
        self.batch_val_acc.push(accuracy);
    }

    /// (training, validation) series for "loss" or "accuracy".
    pub fn series(&self, stats: &str) -> Option<(&[f64], &[f64])> {
        match stats.to_lowercase().as_str() {
            "loss" => Some((self.batch_losses.as_slice(), self.batch_val_losses.as_slice())),
            "accuracy" | "acc" => Some((self.batch_acc.as_slice(), self.batch_val_acc.as_slice())),
            _ => None,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = String::from(BATCH_STATS_HEADER);
        out.push('\n');
        let phases = [
            ("train", &self.batch_losses,     &self.batch_acc),
            ("val",   &self.batch_val_losses, &self.batch_val_acc),
        ];
        for (phase, losses, accs) in phases {
            for (step, (loss, acc)) in losses.iter().zip(accs.iter()).enumerate() {
                out.push_str(&format!("{phase},{step},{loss:.6},{acc:.6}\n"));
            }
        }
        fs::write(path, out)
            .with_context(|| format!("Cannot write batch stats to '{}'", path.display()))?;
        tracing::debug!("Saved batch stats to '{}'", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read batch stats from '{}'", path.display()))?;

        let mut stats = Self::default();
        for (n, line) in text.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            let [phase, _step, loss, acc] = fields.as_slice() else {
                bail!("{}:{}: expected 4 columns, got '{}'", path.display(), n + 1, line);
            };
            let loss: f64 = loss.parse().with_context(|| format!("bad loss on line {}", n + 1))?;
            let acc:  f64 = acc.parse().with_context(|| format!("bad accuracy on line {}", n + 1))?;
            match *phase {
                "train" => stats.record_train(loss, acc),
                "val"   => stats.record_val(loss, acc),
                other   => bail!("{}:{}: unknown phase '{}'", path.display(), n + 1, other),
            }
        }
        Ok(stats)
    }
}
