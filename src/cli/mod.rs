// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All business logic is delegated to Layer 2 (application).
//
// Three commands are supported:
//   1. `train`   — trains the recognizer on a line manifest
//   2. `predict` — transcribes images with a checkpoint
//   3. `plot`    — draws the batch loss / accuracy curves
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{bail, Context, Result};
use clap::Parser;
use commands::{Commands, PlotArgs, PredictArgs, TrainArgs};

use crate::application::{
    predict_use_case::PredictUseCase,
    train_use_case::{TrainConfig, TrainUseCase},
};
use crate::data::loader::ManifestLoader;
use crate::infra::{
    metrics::BatchStats,
    plot::{default_font, load_font, plot_stats},
};

#[derive(Parser, Debug)]
#[command(
    name = "line-htr",
    version,
    about = "Train a CRNN + CTC handwritten line recognizer, then transcribe line images."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. Routes only, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Predict(args) => run_predict(args),
            Commands::Plot(args)    => run_plot(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = match args.config.clone() {
        Some(path) => TrainConfig::from_json_file(&path)?,
        None       => TrainConfig::from(args),
    };

    tracing::info!("Starting training on manifest: {}", config.manifest);
    TrainUseCase::new(config).execute()?;

    println!("Training complete. Best weights saved.");
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    if args.images.is_empty() && args.manifest.is_none() {
        bail!("Nothing to do: pass image paths and/or --manifest");
    }
    let use_case = PredictUseCase::from_checkpoint(&args.checkpoint_dir)?;

    for (path, t) in use_case.predict(&args.images)? {
        println!("{}\t{}\t(confidence {:.3})", path.display(), t.text, t.confidence);
    }

    if let Some(manifest) = args.manifest {
        let report = use_case.evaluate(&ManifestLoader::new(manifest))?;
        println!(
            "\n{} lines | CER={:.2}% | WER={:.2}%",
            report.lines, report.cer * 100.0, report.wer * 100.0
        );
    }
    Ok(())
}

fn run_plot(args: PlotArgs) -> Result<()> {
    let stats = BatchStats::load(&args.stats_file)?;
    let (training, validation) = stats
        .series(&args.stats)
        .with_context(|| format!("Unknown statistic '{}': use loss or accuracy", args.stats))?;

    let font = match &args.font {
        Some(path) => load_font(path)?,
        None       => default_font()?,
    };

    let output = args.output_path();
    plot_stats(training, validation, &args.x_label, &args.stats, &output, &font)?;
    println!("Plot written to {}", output.display());
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::OptimizerKind;

    #[test]
    fn test_train_args_become_config() {
        let cli = Cli::try_parse_from([
            "line-htr", "train",
            "--width", "512", "--charset", "abc",
            "--optimizer", "rmsprop", "--patience", "3", "--no-restore-best",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg = TrainConfig::from(args);

        assert_eq!(cfg.input_size.width, 512);
        assert_eq!(cfg.charset.len(), 3);
        assert_eq!(cfg.optimizer, OptimizerKind::RmsProp);
        assert_eq!(cfg.monitor.early_stopping_patience, 3);
        assert!(!cfg.monitor.restore_best_weights);
        assert_eq!(cfg.monitor.checkpoint_name, "checkpoint_weights");
    }

    #[test]
    fn test_default_train_args_match_default_config() {
        let cli = Cli::try_parse_from(["line-htr", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(TrainConfig::from(args), TrainConfig::default());
    }

    #[test]
    fn test_plot_default_output_sits_next_to_stats() {
        let cli = Cli::try_parse_from(["line-htr", "plot", "--stats", "Accuracy"]).unwrap();
        let Commands::Plot(args) = cli.command else { panic!("expected plot") };
        assert_eq!(args.output_path(), std::path::PathBuf::from("logs/accuracy.png"));
    }

    #[test]
    fn test_plot_command_renders_saved_stats() {
        let dir   = tempfile::tempdir().unwrap();
        let stats = dir.path().join("batch_stats.csv");
        let mut s = BatchStats::default();
        s.record_train(3.0, 0.1);
        s.record_train(2.0, 0.4);
        s.record_val(2.5, 0.3);
        s.save(&stats).unwrap();

        let cli = Cli::try_parse_from([
            "line-htr", "plot", "--stats-file", stats.to_str().unwrap(),
        ])
        .unwrap();
        cli.run().unwrap();

        // axis title rendered with the bundled font
        let img = image::open(dir.path().join("loss.png")).unwrap().to_rgb8();
        let (w, h) = img.dimensions();
        assert!((h - 24..h).any(|y| (0..w).any(|x| img.get_pixel(x, y).0 != [255, 255, 255])));
    }
}
