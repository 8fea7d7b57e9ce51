// src/engine.rs
//
// The core of staged-image. A staged handle that:
// 1. Records crop/resize requests without touching pixels
// 2. Plans final geometry and applies it in one commit
// 3. Runs loads and saves on background workers, one at a time per handle
//
// This file is a facade over the modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA. Beyond this is likely malicious.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod common;
mod decoder;
mod encoder;
mod executor;
mod handle;
mod library;
mod limits;
mod pipeline;
pub mod planner;
mod pool;

pub use decoder::{format_to_string, inspect_path};
pub use encoder::OUTPUT_FORMATS;
pub use executor::{ExecutorConfig, TaskExecutor, TaskId, TaskKind, TaskState};
pub use handle::{ImageHandle, SharedImage, DEFAULT_QUALITY};
pub use library::{Decoded, ImageCrateLibrary, ImageLibrary, LibraryResult};
pub use limits::{DecodeLimits, LoadOptions};
pub use pipeline::{crop_and_resize, ResizeError};
pub use pool::WORKERS_ENV;
