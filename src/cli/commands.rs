// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `predict` and `plot`
// and all their configurable flags.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::train_use_case::TrainConfig;
use crate::data::charset::Charset;
use crate::domain::line_sample::InputSize;
use crate::ml::{
    model::{OptimizerKind, DEFAULT_LEARNING_RATE},
    monitor::MonitorConfig,
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the recognizer on a manifest of labelled line images
    Train(TrainArgs),

    /// Transcribe line images with a trained checkpoint
    Predict(PredictArgs),

    /// Draw training / validation curves from batch statistics
    Plot(PlotArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Read the whole training config from this JSON file;
    /// the other flags are then ignored
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// TSV manifest: one `<image path>\t<transcription>` per line
    #[arg(long, default_value = "data/lines/labels.tsv")]
    pub manifest: String,

    /// Directory for the best weights and train_config.json
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Directory for metrics.csv and batch_stats.csv
    #[arg(long, default_value = "logs")]
    pub log_dir: String,

    /// Input image height in pixels
    #[arg(long, default_value_t = 128)]
    pub height: usize,

    /// Input image width in pixels; width / 8 is the number of timesteps
    #[arg(long, default_value_t = 1024)]
    pub width: usize,

    /// 1 for grayscale, 3 for RGB
    #[arg(long, default_value_t = 1)]
    pub channels: usize,

    /// Transcriptions are padded or truncated to this many characters
    #[arg(long, default_value_t = 128)]
    pub max_text_length: usize,

    /// Characters the model can emit (default: printable ASCII)
    #[arg(long)]
    pub charset: Option<String>,

    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,

    #[arg(long, default_value_t = DEFAULT_LEARNING_RATE)]
    pub lr: f64,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    /// Upper bound; early stopping usually ends training sooner
    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    /// Share of the manifest used for training, the rest validates
    #[arg(long, default_value_t = 0.9)]
    pub train_fraction: f64,

    /// Seed for the split and the batch shuffling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 2)]
    pub num_workers: usize,

    /// Hidden units per direction of each BiLSTM layer
    #[arg(long, default_value_t = 256)]
    pub rnn_units: usize,

    #[arg(long, default_value_t = 2)]
    pub rnn_layers: usize,

    #[arg(long, default_value_t = 0.5)]
    pub rnn_dropout: f64,

    /// Epochs without val_loss improvement before stopping
    #[arg(long, default_value_t = 10)]
    pub patience: usize,

    /// Epochs without val_loss improvement before lowering the lr
    #[arg(long, default_value_t = 5)]
    pub lr_patience: usize,

    /// Multiplier applied to the lr on a plateau
    #[arg(long, default_value_t = 0.2)]
    pub lr_factor: f64,

    #[arg(long, default_value_t = 0.0)]
    pub min_lr: f64,

    /// Keep the last epoch's weights instead of the best ones
    #[arg(long)]
    pub no_restore_best: bool,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            manifest:        a.manifest,
            checkpoint_dir:  a.checkpoint_dir,
            input_size:      InputSize::new(a.height, a.width, a.channels),
            max_text_length: a.max_text_length,
            charset:         a.charset.as_deref().map(Charset::new).unwrap_or_default(),
            optimizer:       a.optimizer,
            lr:              a.lr,
            batch_size:      a.batch_size,
            epochs:          a.epochs,
            train_fraction:  a.train_fraction,
            seed:            a.seed,
            num_workers:     a.num_workers,
            rnn_units:       a.rnn_units,
            rnn_layers:      a.rnn_layers,
            rnn_dropout:     a.rnn_dropout,
            monitor: MonitorConfig {
                log_dir:                 a.log_dir,
                early_stopping_patience: a.patience,
                restore_best_weights:    !a.no_restore_best,
                lr_reduce_factor:        a.lr_factor,
                lr_reduce_patience:      a.lr_patience,
                min_learning_rate:       a.min_lr,
                ..MonitorConfig::default()
            },
        }
    }
}

/// All arguments for the `predict` command
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Line images to transcribe
    pub images: Vec<PathBuf>,

    /// Score a labelled TSV manifest (CER / WER) instead of / as well as images
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,
}

/// All arguments for the `plot` command
#[derive(Args, Debug)]
pub struct PlotArgs {
    /// batch_stats.csv written during training
    #[arg(long, default_value = "logs/batch_stats.csv")]
    pub stats_file: PathBuf,

    /// Which statistic to draw: loss or accuracy
    #[arg(long, default_value = "loss")]
    pub stats: String,

    #[arg(long, default_value = "training steps")]
    pub x_label: String,

    /// Output image (default: <stats>.png next to the stats file)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// TrueType font for axis labels and legend text (default: DejaVu Sans)
    #[arg(long)]
    pub font: Option<PathBuf>,
}

impl PlotArgs {
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            self.stats_file
                .with_file_name(format!("{}.png", self.stats.to_lowercase()))
        })
    }
}
