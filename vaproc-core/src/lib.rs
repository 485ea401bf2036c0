//! # VAPROC Core
//!
//! VA-API video post-processing filters: color adjustment, noise
//! reduction, sharpening and motion aware deinterlacing, run on hardware
//! surfaces through the video processing entrypoint.
//!
//! ```text
//! decoder surface ─► VaFilter::filter ─► submit ─► output pool surface
//!                         │
//!                   VarStore (live parameters)
//! ```

// ============================================================================
// Accelerator
// ============================================================================
pub mod va;
#[cfg(target_os = "linux")]
pub mod vaapi;
pub mod probe;

// ============================================================================
// Frames and Surfaces
// ============================================================================
pub mod frame;
pub mod pool;
pub mod history;

// ============================================================================
// Filter Core
// ============================================================================
pub mod range;
pub mod config;
pub mod lifecycle;
pub mod submit;

// ============================================================================
// Filters
// ============================================================================
pub mod adjust;
pub mod basic;
pub mod deinterlace;
pub mod filter;

#[cfg(test)]
mod testing;

pub use config::{FilterSettings, VarStore};
pub use filter::{lookup, FilterContext, FilterError, FilterKind, VaFilter, MODULES};
pub use frame::{Chroma, Picture, PictureMeta, VideoFormat};
pub use pool::SurfacePool;
pub use probe::{probe_capabilities, VppCapabilities};
pub use va::{SessionSource, VaError, VaSession};
