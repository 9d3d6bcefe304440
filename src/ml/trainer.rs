// ============================================================
// Layer 5 — Training Loop
// ============================================================
// One explicit step function and one explicit epoch loop.
//
//   train_step   forward → CTC loss → backward → optimizer step
//                The model and optimizer go in by value and come
//                back out, so the caller always owns them.
//
//   train_loop   for each epoch:
//                  train batches          (AutodiffBackend)
//                  validate on model.valid()  (InnerBackend)
//                  log metrics.csv + println summary
//                  BestCheckpoint     → save best weights
//                  EarlyStopping      → stop / keep best copy
//                  ReduceLrOnPlateau  → next epoch's lr
//                then restore the best weights and write
//                batch_stats.csv for the `plot` command.
//
// Key Burn 0.20 points:
//   - model.valid() returns the model on B::InnerBackend, so the
//     validation DataLoader is built for the inner backend too
//   - the optimizer is generic; run_training builds the model with
//     Adam or RMSprop and train_loop starts from its learning rate
//
// A batch whose loss is +inf or NaN is skipped: no backward pass,
// no update. The loop warns and counts it. An epoch in which every
// batch was skipped aborts training with NonFiniteLoss.
//
// Reference: Burn Book §5 (Custom Training Loop)

use anyhow::{Context, Result};
use std::{path::Path, sync::Arc};
use burn::{
    backend::{wgpu::WgpuDevice, Autodiff, Wgpu},
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{LineBatch, LineBatcher},
    charset::Charset,
    dataset::LineDataset,
};
use crate::domain::error::{HtrError, HtrResult};
use crate::infra::{
    checkpoint::{BestRecord, CheckpointManager},
    metrics::{
        character_error_rate, label_accuracy, word_error_rate, BatchStats, EpochMetrics,
        MetricsLogger,
    },
};
use crate::ml::{
    decoder::GreedyDecoder,
    loss::ctc_loss,
    model::{adam, build_model_with, rms_prop, Crnn, OptimizerKind, TrainableModel},
    monitor::{BestCheckpoint, EarlyStopping, ReduceLrOnPlateau},
};

type MyBackend = Autodiff<Wgpu>;

/// What one optimisation step observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    /// Batch-mean CTC loss
    pub loss: f64,
    /// 1 − CER of the greedy decoding against the targets
    pub accuracy: f64,
    /// True when the loss was not finite and no update was applied
    pub skipped: bool,
}

/// Forward, CTC loss, backward and one optimizer update.
pub fn train_step<B, O>(
    model: Crnn<B>,
    batch: LineBatch<B>,
    mut optim: O,
    lr: f64,
) -> HtrResult<(Crnn<B>, O, StepMetrics)>
where
    B: AutodiffBackend,
    O: Optimizer<Crnn<B>, B>,
{
    let targets = batch.targets;
    let probs   = model.try_forward(batch.images)?;

    let accuracy = batch_accuracy(&probs, &targets);
    let loss     = ctc_loss(targets, probs)?;
    let value: f64 = loss.clone().into_scalar().elem::<f64>();

    if !value.is_finite() {
        return Ok((model, optim, StepMetrics { loss: value, accuracy, skipped: true }));
    }

    let grads = loss.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    let model = optim.step(lr, model, grads);

    Ok((model, optim, StepMetrics { loss: value, accuracy, skipped: false }))
}

/// Greedy-decoded paths and the unpadded target rows, as class indices.
fn decode_pairs<B: Backend>(
    probs:   &Tensor<B, 3>,
    targets: &Tensor<B, 2, Int>,
) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
    let [_, _, num_classes] = probs.dims();
    let [_, max_len]        = targets.dims();

    let predicted = GreedyDecoder::for_classes(num_classes)
        .decode_batch(probs.clone())
        .into_iter()
        .map(|path| path.indices)
        .collect();

    let flat: Vec<i64> = targets
        .clone()
        .into_data()
        .convert::<i64>()
        .to_vec()
        .unwrap_or_default();
    let references = flat
        .chunks(max_len.max(1))
        .map(|row| row.iter().filter(|&&i| i > 0).map(|&i| i as usize).collect())
        .collect();

    (predicted, references)
}

fn batch_accuracy<B: Backend>(probs: &Tensor<B, 3>, targets: &Tensor<B, 2, Int>) -> f64 {
    let (predicted, references) = decode_pairs(probs, targets);
    label_accuracy(&predicted, &references)
}

// ─── Validation ───────────────────────────────────────────────────────────────

/// Loss and error rates over the whole validation set.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// Mean over finite batch losses; NaN if there were none
    pub loss: f64,
    pub cer:  f64,
    pub wer:  f64,
    pub batch_losses:   Vec<f64>,
    pub batch_accuracy: Vec<f64>,
}

pub fn evaluate<B: Backend>(
    model:   &Crnn<B>,
    loader:  &dyn DataLoader<B, LineBatch<B>>,
    charset: &Charset,
) -> HtrResult<ValidationReport> {
    let mut batch_losses   = Vec::new();
    let mut batch_accuracy = Vec::new();
    let mut predictions    = Vec::new();
    let mut references     = Vec::new();

    for batch in loader.iter() {
        let probs = model.try_forward(batch.images)?;
        let (predicted, expected) = decode_pairs(&probs, &batch.targets);

        let loss: f64 = ctc_loss(batch.targets, probs)?.into_scalar().elem::<f64>();
        batch_losses.push(loss);
        batch_accuracy.push(label_accuracy(&predicted, &expected));

        predictions.extend(predicted.iter().map(|p| charset.decode(p)));
        references.extend(expected.iter().map(|r| charset.decode(r)));
    }

    Ok(ValidationReport {
        loss: finite_mean(&batch_losses),
        cer:  character_error_rate(&predictions, &references),
        wer:  word_error_rate(&predictions, &references),
        batch_losses,
        batch_accuracy,
    })
}

fn finite_mean(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        f64::NAN
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    }
}

// ─── Training loop ────────────────────────────────────────────────────────────

/// The trained model and what happened along the way.
pub struct TrainOutcome<B: Backend> {
    pub model:           Crnn<B>,
    pub history:         Vec<EpochMetrics>,
    pub batch_stats:     BatchStats,
    pub skipped_batches: usize,
    pub best_epoch:      Option<usize>,
}

pub fn run_training(
    cfg:           &TrainConfig,
    train_dataset: LineDataset,
    val_dataset:   LineDataset,
    ckpt_manager:  &CheckpointManager,
) -> Result<()> {
    let device = WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);

    let model_config = cfg.model_config();
    let outcome = match cfg.optimizer {
        OptimizerKind::Adam => {
            let built = build_model_with::<MyBackend, _>(&model_config, adam(), cfg.lr, &device)
                .context("Cannot build the CRNN for this input size")?;
            train_loop(cfg, built, train_dataset, val_dataset, ckpt_manager, &device)?
        }
        OptimizerKind::RmsProp => {
            let built = build_model_with::<MyBackend, _>(&model_config, rms_prop(), cfg.lr, &device)
                .context("Cannot build the CRNN for this input size")?;
            train_loop(cfg, built, train_dataset, val_dataset, ckpt_manager, &device)?
        }
    };

    if outcome.skipped_batches > 0 {
        tracing::warn!("{} batches were skipped for non-finite loss", outcome.skipped_batches);
    }
    tracing::info!("Training complete!");
    Ok(())
}

pub fn train_loop<B, O>(
    cfg:           &TrainConfig,
    built:         TrainableModel<Crnn<B>, O>,
    train_dataset: LineDataset,
    val_dataset:   LineDataset,
    ckpt_manager:  &CheckpointManager,
    device:        &B::Device,
) -> Result<TrainOutcome<B>>
where
    B: AutodiffBackend,
    O: Optimizer<Crnn<B>, B>,
{
    let TrainableModel { mut model, optimizer: mut optim, learning_rate } = built;
    let monitor = &cfg.monitor;
    let charset = &cfg.charset;
    tracing::info!(
        "Model ready: {} timesteps, {} classes, optimizer={:?}",
        model.timesteps(), charset.num_classes(), cfg.optimizer
    );

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let train_loader: Arc<dyn DataLoader<B, LineBatch<B>>> =
        DataLoaderBuilder::new(LineBatcher::new(cfg.input_size))
            .batch_size(cfg.batch_size)
            .shuffle(cfg.seed)
            .num_workers(cfg.num_workers)
            .set_device(device.clone())
            .build(train_dataset);

    // ── Validation data loader (InnerBackend, no autodiff overhead) ───────────
    let val_loader: Arc<dyn DataLoader<B::InnerBackend, LineBatch<B::InnerBackend>>> =
        DataLoaderBuilder::new(LineBatcher::new(cfg.input_size))
            .batch_size(cfg.batch_size)
            .num_workers(cfg.num_workers)
            .set_device(device.clone())
            .build(val_dataset);

    let logger         = MetricsLogger::new(&monitor.log_dir)?;
    let mut best_ckpt  = BestCheckpoint::new();
    let mut early_stop = EarlyStopping::from(monitor);
    let mut reduce_lr  = ReduceLrOnPlateau::from(monitor);

    let mut lr              = learning_rate;
    let mut history         = Vec::new();
    let mut batch_stats     = BatchStats::default();
    let mut skipped_batches = 0usize;
    let mut best_model: Option<Crnn<B>> = None;

    for epoch in 1..=cfg.epochs {

        // ── Training phase ────────────────────────────────────────────────────
        let mut train_losses = Vec::new();
        let mut skipped      = 0usize;
        let mut last_bad     = f64::NAN;

        for (index, batch) in train_loader.iter().enumerate() {
            let (next_model, next_optim, step) = train_step(model, batch, optim, lr)?;
            model = next_model;
            optim = next_optim;

            if step.skipped {
                tracing::warn!(
                    "Epoch {} batch {}: non-finite loss {}, update skipped",
                    epoch, index, step.loss
                );
                skipped += 1;
                last_bad = step.loss;
                continue;
            }
            batch_stats.record_train(step.loss, step.accuracy);
            train_losses.push(step.loss);
        }

        skipped_batches += skipped;
        if train_losses.is_empty() && skipped > 0 {
            return Err(HtrError::NonFiniteLoss { batch: skipped - 1, value: last_bad }.into());
        }
        let avg_train_loss = finite_mean(&train_losses);

        // ── Validation phase ──────────────────────────────────────────────────
        // dropout disabled for deterministic evaluation
        let report = evaluate(&model.valid(), val_loader.as_ref(), charset)?;
        for (loss, acc) in report.batch_losses.iter().zip(&report.batch_accuracy) {
            batch_stats.record_val(*loss, *acc);
        }

        let metrics = EpochMetrics::new(epoch, avg_train_loss, report.loss, report.cer, report.wer, lr);
        logger.log(&metrics)?;

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | cer={:.1}% | wer={:.1}% | lr={:.2e}",
            epoch, cfg.epochs, avg_train_loss, report.loss,
            report.cer * 100.0, report.wer * 100.0, lr,
        );

        // ── Monitors ──────────────────────────────────────────────────────────
        if best_ckpt.should_save(report.loss) {
            let best = BestRecord { epoch, val_loss: report.loss };
            ckpt_manager.save_weights(&model, &monitor.checkpoint_name, best)?;
            tracing::info!("Checkpoint saved for epoch {}", epoch);
        }

        let decision = early_stop.update(epoch, report.loss);
        if decision.improved && early_stop.restore_best_weights() {
            best_model = Some(model.clone());
        }

        history.push(metrics);
        lr = reduce_lr.update(report.loss, lr);

        if decision.stop {
            break;
        }
    }

    if let Some(best) = best_model {
        tracing::info!(
            "Restoring weights from epoch {}",
            early_stop.best_epoch().unwrap_or_default()
        );
        model = best;
    }

    let stats_path = Path::new(&monitor.log_dir).join("batch_stats.csv");
    batch_stats.save(&stats_path)?;

    Ok(TrainOutcome {
        model,
        history,
        batch_stats,
        skipped_batches,
        best_epoch: early_stop.best_epoch(),
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::data::dataloader::batcher::Batcher;
    use image::{GrayImage, Luma};

    use crate::data::{dataset::LineItem, preprocessor::Preprocessor};
    use crate::domain::line_sample::{InputSize, LineSample};
    use crate::ml::monitor::MonitorConfig;

    type TestBackend = Autodiff<NdArray<f32>>;

    const SIZE: InputSize = InputSize { height: 32, width: 64, channels: 1 };

    fn test_config(dir: &Path) -> TrainConfig {
        TrainConfig {
            checkpoint_dir:  dir.join("ckpt").display().to_string(),
            input_size:      SIZE,
            max_text_length: 4,
            charset:         Charset::new("ab"),
            batch_size:      2,
            epochs:          2,
            num_workers:     1,
            rnn_units:       8,
            rnn_layers:      1,
            rnn_dropout:     0.0,
            monitor: MonitorConfig {
                log_dir: dir.join("logs").display().to_string(),
                ..MonitorConfig::default()
            },
            ..TrainConfig::default()
        }
    }

    fn line_dataset(dir: &Path, cfg: &TrainConfig, texts: &[&str]) -> LineDataset {
        let samples = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let path = dir.join(format!("line_{i}.png"));
                GrayImage::from_fn(64, 32, |x, _| Luma([if (x / 8) % 2 == 0 { 0 } else { 255 }]))
                    .save(&path)
                    .unwrap();
                LineSample::new(path, *text)
            })
            .collect();
        LineDataset::new(
            samples,
            Preprocessor::new(cfg.input_size).unwrap(),
            cfg.charset.clone(),
            cfg.max_text_length,
        )
    }

    fn batch_of(labels: Vec<Vec<i64>>) -> LineBatch<TestBackend> {
        let items = labels
            .into_iter()
            .map(|label| LineItem { pixels: vec![0.5; SIZE.num_values()], label })
            .collect();
        LineBatcher::new(SIZE).batch(items, &Default::default())
    }

    #[test]
    fn test_train_step_updates_weights() {
        let device = Default::default();
        let dir    = tempfile::tempdir().unwrap();
        let cfg    = test_config(dir.path());
        let model  = cfg.model_config().init::<TestBackend>(&device).unwrap();
        let before: Vec<f32> = model.head.weight.val().into_data().to_vec().unwrap();

        let batch = batch_of(vec![vec![2, 3, 0, 0], vec![3, 0, 0, 0]]);
        let (model, _, step) = train_step(model, batch, adam(), 1e-2).unwrap();

        assert!(!step.skipped);
        assert!(step.loss.is_finite() && step.loss > 0.0);
        assert!((0.0..=1.0).contains(&step.accuracy));
        let after: Vec<f32> = model.head.weight.val().into_data().to_vec().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_train_step_skips_infeasible_labels() {
        let device = Default::default();
        let dir    = tempfile::tempdir().unwrap();
        let cfg    = test_config(dir.path());
        let model  = cfg.model_config().init::<TestBackend>(&device).unwrap();
        let before: Vec<f32> = model.head.weight.val().into_data().to_vec().unwrap();

        // 8 timesteps cannot hold 9 labels
        let batch = batch_of(vec![vec![2, 3, 2, 3, 2, 3, 2, 3, 2]]);
        let (model, _, step) = train_step(model, batch, adam(), 1e-2).unwrap();

        assert!(step.skipped);
        assert!(!step.loss.is_finite());
        let after: Vec<f32> = model.head.weight.val().into_data().to_vec().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_train_step_rejects_wrong_image_size() {
        let device = Default::default();
        let dir    = tempfile::tempdir().unwrap();
        let cfg    = test_config(dir.path());
        let model  = cfg.model_config().init::<TestBackend>(&device).unwrap();

        let batch = LineBatch {
            images:  Tensor::<TestBackend, 4>::zeros([1, 1, 16, 64], &device),
            targets: Tensor::<TestBackend, 2, Int>::zeros([1, 4], &device),
        };
        assert!(matches!(
            train_step(model, batch, adam(), 1e-3),
            Err(HtrError::Shape(_))
        ));
    }

    #[test]
    fn test_train_loop_writes_checkpoint_and_logs() {
        let device = Default::default();
        let dir    = tempfile::tempdir().unwrap();
        let cfg    = test_config(dir.path());
        let ckpt   = CheckpointManager::new(&cfg.checkpoint_dir).unwrap();

        let train = line_dataset(dir.path(), &cfg, &["ab", "ba", "a", "b"]);
        let val   = line_dataset(dir.path(), &cfg, &["ab", "b"]);
        let built = build_model_with::<TestBackend, _>(&cfg.model_config(), adam(), cfg.lr, &device)
            .unwrap();

        let outcome = train_loop(&cfg, built, train, val, &ckpt, &device).unwrap();

        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.skipped_batches, 0);
        assert_eq!(outcome.batch_stats.batch_losses.len(), 4);
        assert_eq!(outcome.batch_stats.batch_val_losses.len(), 2);
        assert!(outcome.history.iter().all(|m| m.train_loss.is_finite()));

        let logs = Path::new(&cfg.monitor.log_dir);
        assert!(logs.join("metrics.csv").exists());
        assert!(logs.join("batch_stats.csv").exists());
        assert!(ckpt.best_record().is_ok());
    }

    #[test]
    fn test_train_loop_stops_early_and_restores_best_weights() {
        let device = Default::default();
        let dir    = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.epochs = 6;
        cfg.monitor.early_stopping_patience = 1;
        // only the first epoch can beat the best by this much
        cfg.monitor.early_stopping_min_delta = 1e6;
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir).unwrap();

        let train = line_dataset(dir.path(), &cfg, &["ab", "ba", "a", "b"]);
        let val   = line_dataset(dir.path(), &cfg, &["ab", "b"]);

        // lr 0 keeps the weights at their epoch-1 values
        let built = build_model_with::<TestBackend, _>(&cfg.model_config(), adam(), 0.0, &device)
            .unwrap();
        let epoch_one: Vec<f32> = built.model.head.weight.val().into_data().to_vec().unwrap();

        let outcome = train_loop(&cfg, built, train, val, &ckpt, &device).unwrap();

        assert!(outcome.history.len() < cfg.epochs);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.best_epoch, Some(1));
        assert!(outcome.history.iter().all(|m| m.learning_rate == 0.0));
        let restored: Vec<f32> = outcome.model.head.weight.val().into_data().to_vec().unwrap();
        assert_eq!(restored, epoch_one);
        assert!(ckpt.best_record().is_ok());
    }

    #[test]
    fn test_finite_mean_ignores_infinities() {
        assert_eq!(finite_mean(&[1.0, f64::INFINITY, 3.0]), 2.0);
        assert!(finite_mean(&[f64::NAN]).is_nan());
        assert!(finite_mean(&[]).is_nan());
    }
}
