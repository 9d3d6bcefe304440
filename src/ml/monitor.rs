// ============================================================
// Layer 5 — Training Monitors
// ============================================================
// Plain state machines the training loop consults once per
// epoch with the validation loss:
//
//   BestCheckpoint     save weights only when val_loss improves
//   EarlyStopping      stop after `patience` epochs without an
//                      improvement larger than `min_delta`;
//                      optionally restore the best weights
//   ReduceLrOnPlateau  multiply the learning rate by `factor`
//                      after `patience` flat epochs
//
// None of them touch the model or the filesystem; the loop
// reads their decisions and acts on them. A NaN loss never
// counts as an improvement.

use serde::{Deserialize, Serialize};

/// Declarative settings for the monitors and their outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// File stem of the best-weights checkpoint inside the checkpoint dir
    pub checkpoint_name:          String,
    /// Directory for metrics CSVs and plots
    pub log_dir:                  String,
    pub early_stopping_patience:  usize,
    pub early_stopping_min_delta: f64,
    pub restore_best_weights:     bool,
    pub lr_reduce_factor:         f64,
    pub lr_reduce_patience:       usize,
    pub lr_reduce_min_delta:      f64,
    pub min_learning_rate:        f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            checkpoint_name:          "checkpoint_weights".to_string(),
            log_dir:                  "logs".to_string(),
            early_stopping_patience:  10,
            early_stopping_min_delta: 1e-8,
            restore_best_weights:     true,
            lr_reduce_factor:         0.2,
            lr_reduce_patience:       5,
            lr_reduce_min_delta:      1e-8,
            min_learning_rate:        0.0,
        }
    }
}

// ─── Plateau tracking ─────────────────────────────────────────────────────────

/// Tracks the best value seen and how many epochs passed since.
#[derive(Debug, Clone)]
struct Plateau {
    best:      f64,
    wait:      usize,
    min_delta: f64,
}

impl Plateau {
    fn new(min_delta: f64) -> Self {
        Self { best: f64::INFINITY, wait: 0, min_delta: min_delta.abs() }
    }

    /// Returns true when `value` improves on the best by more than min_delta.
    fn observe(&mut self, value: f64) -> bool {
        if value < self.best - self.min_delta {
            self.best = value;
            self.wait = 0;
            true
        } else {
            self.wait += 1;
            false
        }
    }
}

// ─── BestCheckpoint ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    best: f64,
}

impl BestCheckpoint {
    pub fn new() -> Self {
        Self { best: f64::INFINITY }
    }

    /// True if `val_loss` is a new best; the caller should save.
    pub fn should_save(&mut self, val_loss: f64) -> bool {
        if val_loss < self.best {
            tracing::info!("val_loss improved from {:.5} to {:.5}", self.best, val_loss);
            self.best = val_loss;
            true
        } else {
            false
        }
    }
}

impl Default for BestCheckpoint {
    fn default() -> Self {
        Self::new()
    }
}

// ─── EarlyStopping ────────────────────────────────────────────────────────────

/// What the loop should do after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopDecision {
    /// This epoch is the new best; keep a copy of its weights
    pub improved: bool,
    pub stop:     bool,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    plateau:  Plateau,
    patience: usize,
    restore_best_weights: bool,
    best_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64, restore_best_weights: bool) -> Self {
        Self {
            plateau: Plateau::new(min_delta),
            patience,
            restore_best_weights,
            best_epoch: None,
        }
    }

    pub fn update(&mut self, epoch: usize, val_loss: f64) -> StopDecision {
        let improved = self.plateau.observe(val_loss);
        if improved {
            self.best_epoch = Some(epoch);
        }
        let stop = self.plateau.wait >= self.patience;
        if stop {
            tracing::info!(
                "Early stopping at epoch {}: no improvement for {} epochs",
                epoch, self.plateau.wait
            );
        }
        StopDecision { improved, stop }
    }

    pub fn restore_best_weights(&self) -> bool {
        self.restore_best_weights
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

// ─── ReduceLrOnPlateau ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    plateau:  Plateau,
    factor:   f64,
    patience: usize,
    min_lr:   f64,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, min_delta: f64, min_lr: f64) -> Self {
        Self { plateau: Plateau::new(min_delta), factor, patience, min_lr }
    }

    /// Returns the learning rate to use for the next epoch.
    pub fn update(&mut self, val_loss: f64, lr: f64) -> f64 {
        if self.plateau.observe(val_loss) || self.plateau.wait < self.patience {
            return lr;
        }
        if lr <= self.min_lr {
            return lr;
        }
        self.plateau.wait = 0;
        let new_lr = (lr * self.factor).max(self.min_lr);
        tracing::info!("Reducing learning rate from {:.3e} to {:.3e}", lr, new_lr);
        new_lr
    }
}

impl From<&MonitorConfig> for EarlyStopping {
    fn from(c: &MonitorConfig) -> Self {
        Self::new(c.early_stopping_patience, c.early_stopping_min_delta, c.restore_best_weights)
    }
}

impl From<&MonitorConfig> for ReduceLrOnPlateau {
    fn from(c: &MonitorConfig) -> Self {
        Self::new(c.lr_reduce_factor, c.lr_reduce_patience, c.lr_reduce_min_delta, c.min_learning_rate)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_checkpoint_saves_only_on_improvement() {
        let mut ckpt = BestCheckpoint::new();
        assert!(ckpt.should_save(3.0));
        assert!(!ckpt.should_save(3.0));
        assert!(ckpt.should_save(2.5));
        assert!(!ckpt.should_save(f64::NAN));
        assert!(!ckpt.should_save(2.6));
    }

    #[test]
    fn test_early_stopping_after_patience() {
        let mut es = EarlyStopping::new(2, 0.0, true);
        assert_eq!(es.update(1, 5.0), StopDecision { improved: true,  stop: false });
        assert_eq!(es.update(2, 5.0), StopDecision { improved: false, stop: false });
        assert_eq!(es.update(3, 6.0), StopDecision { improved: false, stop: true  });
        assert_eq!(es.best_epoch(), Some(1));
    }

    #[test]
    fn test_early_stopping_min_delta() {
        let mut es = EarlyStopping::new(1, 0.5, false);
        assert!(es.update(1, 5.0).improved);
        // 4.8 is better, but not by more than 0.5
        let d = es.update(2, 4.8);
        assert!(!d.improved);
        assert!(d.stop);
    }

    #[test]
    fn test_early_stopping_resets_on_improvement() {
        let mut es = EarlyStopping::new(2, 0.0, true);
        es.update(1, 5.0);
        es.update(2, 5.1);
        assert!(es.update(3, 4.0).improved);
        assert!(!es.update(4, 4.5).stop);
        assert!(es.update(5, 4.5).stop);
    }

    #[test]
    fn test_reduce_lr_after_patience() {
        let mut r = ReduceLrOnPlateau::new(0.2, 2, 0.0, 1e-6);
        let lr = r.update(1.0, 1e-3);
        assert_eq!(lr, 1e-3);
        let lr = r.update(1.0, lr);
        assert_eq!(lr, 1e-3);
        let lr = r.update(1.0, lr);
        assert!((lr - 2e-4).abs() < 1e-12);
        // wait counter restarts after a reduction
        let lr = r.update(1.0, lr);
        assert!((lr - 2e-4).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_lr_respects_floor() {
        let mut r = ReduceLrOnPlateau::new(0.1, 1, 0.0, 5e-4);
        r.update(1.0, 1e-3);
        let lr = r.update(1.0, 1e-3);
        assert_eq!(lr, 5e-4);
        let lr = r.update(1.0, lr);
        assert_eq!(lr, 5e-4);
    }

    #[test]
    fn test_reduce_lr_keeps_waiting_at_floor() {
        let mut r = ReduceLrOnPlateau::new(0.5, 2, 0.0, 0.1);
        r.update(1.0, 0.1);
        r.update(1.0, 0.1);
        // patience reached at the floor: nothing to reduce, wait is kept
        assert_eq!(r.update(1.0, 0.1), 0.1);
        // so a raised lr is cut on the very next plateau epoch
        assert_eq!(r.update(1.0, 1.0), 0.5);
        // and the reduction restarts the count
        assert_eq!(r.update(1.0, 0.5), 0.5);
    }

    #[test]
    fn test_defaults() {
        let c = MonitorConfig::default();
        assert_eq!(c.early_stopping_patience, 10);
        assert_eq!(c.lr_reduce_patience, 5);
        assert_eq!(c.lr_reduce_factor, 0.2);
    }
}
