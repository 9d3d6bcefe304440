// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from a manifest on disk to tensor batches:
//
//   labels.tsv
//       │
//       ▼
//   ManifestLoader    → LineSample { image_path, text }
//       │
//       ▼
//   split_train_val   → seeded train / validation split
//       │
//       ▼
//   LineDataset       → Burn Dataset; decodes + preprocesses the
//       │               image, encodes the text with the Charset
//       ▼
//   LineBatcher       → LineBatch { images [N,C,H,W], targets [N,L] }
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Text ⇄ class-index mapping (pad = 0, blank = last)
pub mod charset;

/// Reads the TSV manifest of line images and transcriptions
pub mod loader;

/// Image resizing / normalisation and text cleanup
pub mod preprocessor;

/// Implements Burn's Dataset trait for line samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Seeded shuffle and train/validation split
pub mod splitter;
