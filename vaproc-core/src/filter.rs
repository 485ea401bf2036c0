//! # Filter Modules
//!
//! Host-facing surface of the filters: the module table, construction by
//! name and the per-frame entry point.
//!
//! ```text
//! lookup("denoise") ─► FilterKind::Basic(Denoise) ─► VaFilter::open
//!                                                      │
//!                       filter(pic) ─► Option<Picture> ┤
//!                       flush() / close()  ────────────┘
//! ```

use std::sync::Arc;
use thiserror::Error;

use crate::adjust::Adjust;
use crate::basic::{BasicFilter, BasicKind};
use crate::config::VarStore;
use crate::deinterlace::Deinterlace;
use crate::frame::{Picture, VideoFormat};
use crate::lifecycle::FilterResources;
use crate::submit::SubmitError;
use crate::va::{FilterType, SessionSource, VaError};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error(
        "Unsupported conversion {} {}x{} -> {} {}x{}",
        .input.chroma.as_str(), .input.width, .input.height,
        .output.chroma.as_str(), .output.width, .output.height
    )]
    UnsupportedFormat {
        input: VideoFormat,
        output: VideoFormat,
    },
    #[error(transparent)]
    Va(#[from] VaError),
    #[error("Filter {0:?} not offered by the driver")]
    FilterUnavailable(FilterType),
    #[error("No usable capabilities for {0:?}")]
    NoCapabilities(FilterType),
    #[error("No deinterlacing algorithm available")]
    NoDeinterlaceAlgorithm,
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),
    #[error("Invalid driver range for {name}: [{min}, {max}]")]
    InvalidRange { name: String, min: f32, max: f32 },
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Parameter not available on this device: {0}")]
    ParameterUnavailable(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: f32 },
}

/// Everything a filter needs at open.
pub struct FilterContext<'a> {
    pub source: &'a dyn SessionSource,
    pub fmt_in: VideoFormat,
    pub fmt_out: VideoFormat,
    pub vars: Arc<VarStore>,
}

// ============================================================================
// Module Table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Adjust,
    Basic(BasicKind),
    Deinterlace,
}

#[derive(Debug, Clone, Copy)]
pub struct FilterModule {
    pub shortcut: &'static str,
    pub description: &'static str,
    pub kind: FilterKind,
    /// Variables the filter reads at open or listens to.
    pub parameters: &'static [&'static str],
}

pub static MODULES: [FilterModule; 4] = [
    FilterModule {
        shortcut: "adjust",
        description: "VA-API color balance (contrast, brightness, hue, saturation)",
        kind: FilterKind::Adjust,
        parameters: &["contrast", "brightness", "hue", "saturation"],
    },
    FilterModule {
        shortcut: "deinterlace",
        description: "VA-API motion aware deinterlacing",
        kind: FilterKind::Deinterlace,
        parameters: &["deinterlace-mode"],
    },
    FilterModule {
        shortcut: "denoise",
        description: "VA-API noise reduction",
        kind: FilterKind::Basic(BasicKind::Denoise),
        parameters: &["denoise-sigma"],
    },
    FilterModule {
        shortcut: "sharpen",
        description: "VA-API sharpening",
        kind: FilterKind::Basic(BasicKind::Sharpen),
        parameters: &["sharpen-sigma"],
    },
];

pub fn lookup(name: &str) -> Option<&'static FilterModule> {
    MODULES.iter().find(|m| m.shortcut.eq_ignore_ascii_case(name))
}

// ============================================================================
// Filter Instance
// ============================================================================

/// An open filter of any kind.
pub enum VaFilter {
    Adjust(Adjust),
    Basic(BasicFilter),
    Deinterlace(Deinterlace),
}

impl VaFilter {
    pub fn open(name: &str, ctx: &FilterContext<'_>) -> Result<Self, FilterError> {
        let module = lookup(name).ok_or_else(|| FilterError::UnknownFilter(name.to_string()))?;
        Self::open_kind(module.kind, ctx)
    }

    pub fn open_kind(kind: FilterKind, ctx: &FilterContext<'_>) -> Result<Self, FilterError> {
        Ok(match kind {
            FilterKind::Adjust => VaFilter::Adjust(Adjust::open(ctx)?),
            FilterKind::Basic(basic) => VaFilter::Basic(BasicFilter::open(basic, ctx)?),
            FilterKind::Deinterlace => VaFilter::Deinterlace(Deinterlace::open(ctx)?),
        })
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            VaFilter::Adjust(_) => FilterKind::Adjust,
            VaFilter::Basic(f) => FilterKind::Basic(f.params().kind()),
            VaFilter::Deinterlace(_) => FilterKind::Deinterlace,
        }
    }

    /// Process one input picture. Failures are logged and yield no output;
    /// the filter stays usable.
    pub fn filter(&mut self, input: Picture) -> Option<Picture> {
        let result = match self {
            VaFilter::Adjust(f) => f.filter(input).map(Some),
            VaFilter::Basic(f) => f.filter(input).map(Some),
            VaFilter::Deinterlace(f) => f.filter(input),
        };
        match result {
            Ok(output) => output,
            Err(SubmitError::PoolExhausted) => {
                tracing::debug!("{:?}: no free output surface, frame dropped", self.kind());
                None
            }
            Err(e) => {
                tracing::warn!("{:?}: submission failed: {}", self.kind(), e);
                None
            }
        }
    }

    /// Drop any frames held for temporal filtering.
    pub fn flush(&mut self) {
        if let VaFilter::Deinterlace(f) = self {
            f.flush();
        }
    }

    pub fn resources(&self) -> &FilterResources {
        match self {
            VaFilter::Adjust(f) => f.resources(),
            VaFilter::Basic(f) => f.resources(),
            VaFilter::Deinterlace(f) => f.resources(),
        }
    }

    /// Unsubscribe, release held frames and tear down the accelerator
    /// resources.
    pub fn close(self) {
        tracing::debug!("{:?}: closing", self.kind());
        drop(self);
    }
}
