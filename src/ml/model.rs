// ============================================================
// Layer 5 — CRNN Topology (Burn)
// ============================================================
// Convolutional-recurrent network for text-line recognition:
//
//   images [N, C, H, W]
//     │  5 × ConvStage  (conv 3×3 same → batch-norm → leaky-relu
//     │                  → optional 2×2 max-pool, optional dropout
//     │                  in front)
//     ▼
//   features [N, 80, H/8, W/8]
//     │  reshape: width becomes time, channels × height features
//     ▼
//   sequence [N, W/8, 80·H/8]
//     │  2 × (dropout 0.5 → BiLSTM 256+256)
//     │  dropout 0.5 → dense d_model → softmax
//     ▼
//   probabilities [N, W/8, d_model]
//
// The builder walks typed shape descriptors through every stage
// before any parameter is allocated, so a bad input size fails
// with HtrError::Shape at construction instead of inside a
// kernel on the first batch.
//
// Reference: Puigcerver (ICDAR 2017), Are multidimensional
//            recurrent layers really necessary for HTR?

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig,
        BiLstm, BiLstmConfig,
        Dropout, DropoutConfig,
        Linear, LinearConfig,
        PaddingConfig2d,
    },
    optim::{AdamConfig, Optimizer, RmsPropConfig},
    prelude::*,
    tensor::{
        activation::{leaky_relu, softmax},
        backend::AutodiffBackend,
    },
};
use serde::{Deserialize, Serialize};

use crate::domain::error::{HtrError, HtrResult};
use crate::domain::line_sample::InputSize;

const LEAKY_SLOPE: f64 = 0.01;
const KERNEL: [usize; 2] = [3, 3];
const POOL: [usize; 2] = [2, 2];

// ─── Shape descriptors ────────────────────────────────────────────────────────

/// Per-sample feature-map shape, channels first (batch axis excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureShape {
    pub channels: usize,
    pub height:   usize,
    pub width:    usize,
}

impl From<InputSize> for FeatureShape {
    fn from(s: InputSize) -> Self {
        Self { channels: s.channels, height: s.height, width: s.width }
    }
}

impl FeatureShape {
    /// Width becomes the time axis; channels × height is flattened.
    pub fn to_sequence(self) -> SequenceShape {
        SequenceShape {
            timesteps: self.width,
            features:  self.channels * self.height,
        }
    }
}

/// Per-sample sequence shape (batch axis excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceShape {
    pub timesteps: usize,
    pub features:  usize,
}

// ─── Convolutional stages ─────────────────────────────────────────────────────

/// Static description of one convolutional stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvStageSpec {
    pub filters: usize,
    /// Dropout applied to the stage input; 0.0 disables it
    pub dropout: f64,
    pub pool:    bool,
}

/// The five stages of the network, in order.
pub const CONV_STAGES: [ConvStageSpec; 5] = [
    ConvStageSpec { filters: 16, dropout: 0.0, pool: true  },
    ConvStageSpec { filters: 32, dropout: 0.0, pool: true  },
    ConvStageSpec { filters: 48, dropout: 0.2, pool: true  },
    ConvStageSpec { filters: 64, dropout: 0.2, pool: false },
    ConvStageSpec { filters: 80, dropout: 0.2, pool: false },
];

impl ConvStageSpec {
    /// Same-padded stride-1 conv keeps H and W; the 2×2/2 valid
    /// pool floors both. Pooling an axis shorter than 2 is an error.
    pub fn output_shape(&self, input: FeatureShape) -> HtrResult<FeatureShape> {
        if input.channels == 0 {
            return Err(HtrError::shape("convolution input has zero channels"));
        }
        if !self.pool {
            return Ok(FeatureShape { channels: self.filters, ..input });
        }
        if input.height < POOL[0] || input.width < POOL[1] {
            return Err(HtrError::shape(format!(
                "cannot apply 2x2 max-pool to a {}x{} feature map ({} filters stage)",
                input.height, input.width, self.filters
            )));
        }
        Ok(FeatureShape {
            channels: self.filters,
            height:   input.height / POOL[0],
            width:    input.width / POOL[1],
        })
    }

    fn init<B: Backend>(&self, in_channels: usize, device: &B::Device) -> ConvStage<B> {
        let dropout = (self.dropout > 0.0).then(|| DropoutConfig::new(self.dropout).init());
        let conv = Conv2dConfig::new([in_channels, self.filters], KERNEL)
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        // Keras-style running statistics: momentum 0.99 ⇔ burn's 0.01
        let norm = BatchNormConfig::new(self.filters)
            .with_momentum(0.01)
            .with_epsilon(1e-3)
            .init(device);
        let pool = self.pool.then(|| MaxPool2dConfig::new(POOL).with_strides(POOL).init());
        ConvStage { dropout, conv, norm, pool }
    }
}

#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub dropout: Option<Dropout>,
    pub conv:    Conv2d<B>,
    pub norm:    BatchNorm<B>,
    pub pool:    Option<MaxPool2d>,
}

impl<B: Backend> ConvStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };
        let x = self.conv.forward(x);
        let x = leaky_relu(self.norm.forward(x), LEAKY_SLOPE);
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

// ─── Configuration ────────────────────────────────────────────────────────────

// #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct CrnnConfig {
    pub input_size: InputSize,
    /// Output classes, blank included (blank is the last one)
    pub d_model: usize,
    #[config(default = 256)]
    pub rnn_units: usize,
    #[config(default = 2)]
    pub rnn_layers: usize,
    #[config(default = 0.5)]
    pub rnn_dropout: f64,
}

impl CrnnConfig {
    /// Walk the shape of one sample through every stage.
    /// Returns the per-stage feature shapes and the final sequence shape.
    pub fn trace_shapes(&self) -> HtrResult<(Vec<FeatureShape>, SequenceShape)> {
        let mut shape  = FeatureShape::from(self.input_size);
        if shape.height == 0 || shape.width == 0 {
            return Err(HtrError::shape(format!(
                "input size {}x{} has an empty axis",
                shape.height, shape.width
            )));
        }
        let mut shapes = Vec::with_capacity(CONV_STAGES.len());
        for stage in &CONV_STAGES {
            shape = stage.output_shape(shape)?;
            shapes.push(shape);
        }
        let sequence = shape.to_sequence();
        if sequence.timesteps == 0 || sequence.features == 0 {
            return Err(HtrError::shape("feature map collapsed to an empty sequence"));
        }
        Ok((shapes, sequence))
    }

    /// Validate the configuration, then allocate every layer.
    pub fn init<B: Backend>(&self, device: &B::Device) -> HtrResult<Crnn<B>> {
        if self.d_model < 2 {
            return Err(HtrError::Config(format!(
                "d_model must be at least 2 (alphabet + blank), got {}",
                self.d_model
            )));
        }
        let (_, sequence) = self.trace_shapes()?;

        let mut in_channels = self.input_size.channels;
        let stages = CONV_STAGES
            .iter()
            .map(|spec| {
                let stage = spec.init(in_channels, device);
                in_channels = spec.filters;
                stage
            })
            .collect();

        let mut d_input = sequence.features;
        let rnn = (0..self.rnn_layers)
            .map(|_| {
                let layer = BiLstmConfig::new(d_input, self.rnn_units, true).init(device);
                d_input = 2 * self.rnn_units;
                layer
            })
            .collect();

        tracing::debug!(
            "CRNN: input {:?} → {} timesteps × {} features → {} classes",
            self.input_size, sequence.timesteps, sequence.features, self.d_model
        );

        Ok(Crnn {
            stages,
            rnn,
            rnn_dropout:  DropoutConfig::new(self.rnn_dropout).init(),
            head_dropout: DropoutConfig::new(self.rnn_dropout).init(),
            head:         LinearConfig::new(d_input, self.d_model).init(device),
            channels:     self.input_size.channels,
            height:       self.input_size.height,
            width:        self.input_size.width,
            timesteps:    sequence.timesteps,
        })
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct Crnn<B: Backend> {
    pub stages:       Vec<ConvStage<B>>,
    pub rnn:          Vec<BiLstm<B>>,
    pub rnn_dropout:  Dropout,
    pub head_dropout: Dropout,
    pub head:         Linear<B>,
    pub channels:     usize,
    pub height:       usize,
    pub width:        usize,
    pub timesteps:    usize,
}

impl<B: Backend> Crnn<B> {
    /// images: [batch, channels, height, width] → probabilities [batch, timesteps, d_model]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        softmax(self.forward_logits(images), 2)
    }

    /// Same as `forward`, but rejects a batch whose per-sample shape
    /// differs from the one the model was built for.
    pub fn try_forward(&self, images: Tensor<B, 4>) -> HtrResult<Tensor<B, 3>> {
        let [_, c, h, w] = images.dims();
        if [c, h, w] != [self.channels, self.height, self.width] {
            return Err(HtrError::shape(format!(
                "expected images of shape [N, {}, {}, {}], got [N, {c}, {h}, {w}]",
                self.channels, self.height, self.width
            )));
        }
        Ok(self.forward(images))
    }

    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        let mut x = images;
        for stage in &self.stages {
            x = stage.forward(x);
        }

        // [N, C, H, W] → [N, W, C, H] → [N, W, C·H]
        let [batch, channels, height, width] = x.dims();
        let mut seq = x
            .permute([0, 3, 1, 2])
            .reshape([batch, width, channels * height]);

        for layer in &self.rnn {
            let (out, _) = layer.forward(self.rnn_dropout.forward(seq), None);
            seq = out;
        }

        self.head.forward(self.head_dropout.forward(seq))
    }

    pub fn timesteps(&self) -> usize {
        self.timesteps
    }
}

// ─── Builder ──────────────────────────────────────────────────────────────────

/// Which optimizer drives training. Adam is the default; RMSprop is kept
/// as a selectable alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    #[value(name = "rmsprop")]
    RmsProp,
}

/// A freshly built network together with the optimizer and learning
/// rate it is trained with.
pub struct TrainableModel<M, O> {
    pub model:         M,
    pub optimizer:     O,
    pub learning_rate: f64,
}

pub const DEFAULT_LEARNING_RATE: f64 = 3e-4;

/// Build the CRNN for `input_size` with `d_model` output classes and bind
/// it to an Adam optimizer.
pub fn build_model<B: AutodiffBackend>(
    input_size:    InputSize,
    d_model:       usize,
    learning_rate: f64,
    device:        &B::Device,
) -> HtrResult<TrainableModel<Crnn<B>, impl Optimizer<Crnn<B>, B>>> {
    build_model_with(&CrnnConfig::new(input_size, d_model), adam(), learning_rate, device)
}

/// Build the CRNN described by `config` and bind it to `optimizer`.
pub fn build_model_with<B, O>(
    config:        &CrnnConfig,
    optimizer:     O,
    learning_rate: f64,
    device:        &B::Device,
) -> HtrResult<TrainableModel<Crnn<B>, O>>
where
    B: AutodiffBackend,
    O: Optimizer<Crnn<B>, B>,
{
    let model = config.init::<B>(device)?;
    Ok(TrainableModel { model, optimizer, learning_rate })
}

/// Adam with Keras' default betas and epsilon.
pub fn adam<B: AutodiffBackend>() -> impl Optimizer<Crnn<B>, B> {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-7)
        .init()
}

/// RMSprop with rho 0.9 and Keras' default epsilon.
pub fn rms_prop<B: AutodiffBackend>() -> impl Optimizer<Crnn<B>, B> {
    RmsPropConfig::new()
        .with_alpha(0.9)
        .with_epsilon(1e-7)
        .init()
}
