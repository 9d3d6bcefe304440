// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types shared by every other layer:
//
//   line_sample.rs — one labelled text-line image on disk
//   error.rs       — the typed error returned by the ML and
//                    data layers (shape / label / loss failures)
//   traits.rs      — the seams other layers implement
//
// Rules for this layer:
//   - NO Burn framework types
//   - NO file I/O
//   - Only structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// A transcribed line image
pub mod line_sample;

// Typed errors (thiserror)
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;
