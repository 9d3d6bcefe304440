// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All network, loss and training-loop code lives here.
//
//   model.rs      — The CRNN
//                   5 conv stages (conv 3×3 → batch norm →
//                   leaky ReLU → optional 2×2 max-pool), the
//                   feature map read column by column as a
//                   sequence, stacked bidirectional LSTMs and
//                   a softmax head over d_model classes.
//                   Shapes are traced before any layer exists.
//
//   loss.rs       — CTC loss (log-space forward recursion)
//
//   decoder.rs    — Greedy CTC decoding
//
//   monitor.rs    — Best checkpoint, early stopping and
//                   learning-rate reduction on plateau
//
//   trainer.rs    — train_step and the epoch loop
//
//   inferencer.rs — Loads a checkpoint, transcribes images
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Shi et al. (2015) An End-to-End Trainable Neural
//            Network for Image-based Sequence Recognition
//            Graves et al. (2006) Connectionist Temporal
//            Classification

/// CRNN architecture and optimizer construction
pub mod model;

/// CTC loss over softmax outputs
pub mod loss;

/// Greedy best-path decoding
pub mod decoder;

/// Epoch-level training monitors
pub mod monitor;

/// Training step and loop with validation and checkpointing
pub mod trainer;

/// Inference engine — loads checkpoint and transcribes lines
pub mod inferencer;
