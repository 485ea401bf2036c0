//! # Accelerator Interface
//!
//! Narrow, typed view of the VA-API video processing entrypoint that the
//! filters are written against. The real backend lives in [`crate::vaapi`];
//! tests drive the same trait with an in-memory fake.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::frame::VideoFormat;

#[derive(Debug, Error)]
pub enum VaError {
    #[error("{call} failed: {message} (status {status})")]
    Call {
        call: &'static str,
        status: i32,
        message: String,
    },
    #[error("VA-API library not found: {0}")]
    LibraryNotFound(String),
    #[error("No VA display: {0}")]
    NoDisplay(String),
    #[error("Unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl VaError {
    pub fn call(call: &'static str, status: i32) -> Self {
        VaError::Call {
            call,
            status,
            message: String::new(),
        }
    }
}

// ============================================================================
// Handles
// ============================================================================

macro_rules! va_handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// VA_INVALID_ID
            pub const INVALID: Self = Self(0xffff_ffff);

            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }
        }
    };
}

va_handle!(SurfaceId);
va_handle!(ConfigId);
va_handle!(ContextId);
va_handle!(BufferId);

// ============================================================================
// Filter Types and Capabilities
// ============================================================================

/// VAProcFilterType subset used by the filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterType {
    NoiseReduction,
    Deinterlacing,
    Sharpening,
    ColorBalance,
}

impl FilterType {
    pub fn to_va(self) -> u32 {
        match self {
            FilterType::NoiseReduction => 1,
            FilterType::Deinterlacing => 2,
            FilterType::Sharpening => 3,
            FilterType::ColorBalance => 4,
        }
    }

    pub fn from_va(value: u32) -> Option<Self> {
        match value {
            1 => Some(FilterType::NoiseReduction),
            2 => Some(FilterType::Deinterlacing),
            3 => Some(FilterType::Sharpening),
            4 => Some(FilterType::ColorBalance),
            _ => None,
        }
    }
}

/// VAProcColorBalanceType subset (the manual channels only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorBalanceAttrib {
    Hue,
    Saturation,
    Brightness,
    Contrast,
}

impl ColorBalanceAttrib {
    pub fn to_va(self) -> u32 {
        match self {
            ColorBalanceAttrib::Hue => 1,
            ColorBalanceAttrib::Saturation => 2,
            ColorBalanceAttrib::Brightness => 3,
            ColorBalanceAttrib::Contrast => 4,
        }
    }

    pub fn from_va(value: u32) -> Option<Self> {
        match value {
            1 => Some(ColorBalanceAttrib::Hue),
            2 => Some(ColorBalanceAttrib::Saturation),
            3 => Some(ColorBalanceAttrib::Brightness),
            4 => Some(ColorBalanceAttrib::Contrast),
            _ => None,
        }
    }
}

/// VAProcDeinterlacingType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeinterlaceAlgorithm {
    Bob,
    Weave,
    MotionAdaptive,
    MotionCompensated,
}

impl DeinterlaceAlgorithm {
    pub fn to_va(self) -> u32 {
        match self {
            DeinterlaceAlgorithm::Bob => 1,
            DeinterlaceAlgorithm::Weave => 2,
            DeinterlaceAlgorithm::MotionAdaptive => 3,
            DeinterlaceAlgorithm::MotionCompensated => 4,
        }
    }

    pub fn from_va(value: u32) -> Option<Self> {
        match value {
            1 => Some(DeinterlaceAlgorithm::Bob),
            2 => Some(DeinterlaceAlgorithm::Weave),
            3 => Some(DeinterlaceAlgorithm::MotionAdaptive),
            4 => Some(DeinterlaceAlgorithm::MotionCompensated),
            _ => None,
        }
    }
}

/// VAProcFilterValueRange
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub step: f32,
}

impl ValueRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            default: min,
            step: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorBalanceCap {
    pub attrib: ColorBalanceAttrib,
    pub range: ValueRange,
}

/// Result of `vaQueryVideoProcFilterCaps`, shaped by filter type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterCaps {
    Range(Vec<ValueRange>),
    ColorBalance(Vec<ColorBalanceCap>),
    Deinterlacing(Vec<DeinterlaceAlgorithm>),
}

/// VA_PROC_PIPELINE_FAST
pub const PIPELINE_FAST: u32 = 0x0000_0002;
/// VA_DEINTERLACING_BOTTOM_FIELD_FIRST
pub const DEINTERLACING_BOTTOM_FIELD_FIRST: u32 = 0x0000_0001;

/// Subset of VAProcPipelineCaps the filters consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCaps {
    pub pipeline_flags: u32,
    pub filter_flags: u32,
    pub num_forward_references: u32,
    pub num_backward_references: u32,
}

impl PipelineCaps {
    pub fn is_fast(&self) -> bool {
        self.pipeline_flags & PIPELINE_FAST != 0
    }
}

// ============================================================================
// Buffer Contents
// ============================================================================

/// One element of a filter parameter buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterParam {
    /// VAProcFilterParameterBuffer (noise reduction, sharpening)
    Value { filter: FilterType, value: f32 },
    /// VAProcFilterParameterBufferColorBalance
    ColorBalance { attrib: ColorBalanceAttrib, value: f32 },
    /// VAProcFilterParameterBufferDeinterlacing
    Deinterlacing {
        algorithm: DeinterlaceAlgorithm,
        flags: u32,
    },
}

impl FilterParam {
    pub fn filter_type(&self) -> FilterType {
        match self {
            FilterParam::Value { filter, .. } => *filter,
            FilterParam::ColorBalance { .. } => FilterType::ColorBalance,
            FilterParam::Deinterlacing { .. } => FilterType::Deinterlacing,
        }
    }
}

/// Contents of a VAProcPipelineParameterBuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineParams {
    pub surface: SurfaceId,
    pub filters: Vec<BufferId>,
    pub pipeline_flags: u32,
    pub filter_flags: u32,
    pub forward_references: Vec<SurfaceId>,
    pub backward_references: Vec<SurfaceId>,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            surface: SurfaceId::INVALID,
            filters: Vec::new(),
            pipeline_flags: 0,
            filter_flags: 0,
            forward_references: Vec::new(),
            backward_references: Vec::new(),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// An open accelerator display. Shared between filter instances through
/// `Arc`; dropping the last `Arc` tears the device down.
///
/// Buffer mapping is scoped: `map_*` maps the buffer, hands its typed
/// contents to the closure and unmaps it again. A failure of either the map
/// or the unmap is reported as the call's error.
pub trait VaSession: Send + Sync {
    fn create_surfaces(&self, format: &VideoFormat, count: usize)
        -> Result<Vec<SurfaceId>, VaError>;
    fn destroy_surfaces(&self, surfaces: &[SurfaceId]);

    fn create_config(&self) -> Result<ConfigId, VaError>;
    fn destroy_config(&self, config: ConfigId);

    fn create_context(
        &self,
        config: ConfigId,
        width: u32,
        height: u32,
        targets: &[SurfaceId],
    ) -> Result<ContextId, VaError>;
    fn destroy_context(&self, context: ContextId);

    fn query_filters(&self, context: ContextId) -> Result<Vec<FilterType>, VaError>;
    fn query_filter_caps(
        &self,
        context: ContextId,
        filter: FilterType,
    ) -> Result<FilterCaps, VaError>;
    fn query_pipeline_caps(
        &self,
        context: ContextId,
        filters: &[BufferId],
    ) -> Result<PipelineCaps, VaError>;

    fn create_filter_buffer(
        &self,
        context: ContextId,
        params: &[FilterParam],
    ) -> Result<BufferId, VaError>;
    fn create_pipeline_buffer(&self, context: ContextId) -> Result<BufferId, VaError>;
    fn map_filter_buffer(
        &self,
        buffer: BufferId,
        update: &mut dyn FnMut(&mut [FilterParam]),
    ) -> Result<(), VaError>;
    fn map_pipeline_buffer(
        &self,
        buffer: BufferId,
        update: &mut dyn FnMut(&mut PipelineParams),
    ) -> Result<(), VaError>;
    fn destroy_buffer(&self, buffer: BufferId);

    fn begin_picture(&self, context: ContextId, target: SurfaceId) -> Result<(), VaError>;
    fn render_picture(&self, context: ContextId, buffers: &[BufferId]) -> Result<(), VaError>;
    fn end_picture(&self, context: ContextId) -> Result<(), VaError>;

    /// Whether the context's video processing entrypoint offers `filter`.
    fn is_filter_available(&self, context: ContextId, filter: FilterType) -> Result<bool, VaError> {
        Ok(self.query_filters(context)?.contains(&filter))
    }
}

/// Hands out held references to a shared session.
pub trait SessionSource {
    fn hold(&self) -> Result<Arc<dyn VaSession>, VaError>;
}

impl SessionSource for Arc<dyn VaSession> {
    fn hold(&self) -> Result<Arc<dyn VaSession>, VaError> {
        Ok(Arc::clone(self))
    }
}
