// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by the training loop, the
// recognizer and the CLI:
//
//   checkpoint.rs — Saving and loading model weights
//                   Uses Burn's CompactRecorder for the best
//                   weights and serde_json for train_config.json,
//                   so inference can rebuild the same network.
//
//   metrics.rs    — Training metrics
//                   Epoch CSV (loss, CER, WER, learning rate),
//                   per-batch statistics, edit-distance based
//                   error rates.
//
//   plot.rs       — Training curves
//                   Draws batch statistics to a PNG chart with
//                   image + imageproc (+ ab_glyph for text).
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Epoch metrics, batch statistics and error rates
pub mod metrics;

/// Line charts of training and validation statistics
pub mod plot;
