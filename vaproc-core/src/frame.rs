//! Video formats and surface-backed pictures.

use serde::{Deserialize, Serialize};

use crate::pool::PoolLease;
use crate::va::SurfaceId;

/// Chroma of a negotiated video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chroma {
    /// Opaque VA surface, 8-bit 4:2:0 (NV12 backed)
    Vaapi420,
    /// Opaque VA surface, 10-bit 4:2:0 (P010 backed)
    Vaapi420_10,
    Nv12,
    I420,
}

impl Chroma {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chroma::Vaapi420 => "VAOP",
            Chroma::Vaapi420_10 => "VAO0",
            Chroma::Nv12 => "NV12",
            Chroma::I420 => "I420",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub chroma: Chroma,
    pub width: u32,
    pub height: u32,
    pub visible_width: u32,
    pub visible_height: u32,
    pub frame_rate: (u32, u32),
}

impl VideoFormat {
    pub fn new(chroma: Chroma, width: u32, height: u32) -> Self {
        Self {
            chroma,
            width,
            height,
            visible_width: width,
            visible_height: height,
            frame_rate: (25, 1),
        }
    }

    /// Same chroma and same geometry. Frame rate is not part of the check.
    pub fn is_similar(&self, other: &VideoFormat) -> bool {
        self.chroma == other.chroma
            && self.width == other.width
            && self.height == other.height
            && self.visible_width == other.visible_width
            && self.visible_height == other.visible_height
    }
}

/// Per-picture properties carried from input to output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PictureMeta {
    /// Presentation timestamp (microseconds)
    pub pts_us: i64,
    /// Frame duration (microseconds)
    pub duration_us: i64,
    pub progressive: bool,
    pub top_field_first: bool,
    pub field_count: u8,
    pub keyframe: bool,
}

/// A frame living in an accelerator surface.
///
/// Pictures taken from a [`crate::pool::SurfacePool`] hold a lease on their
/// slot; dropping the picture hands the surface back to the pool.
#[derive(Debug)]
pub struct Picture {
    surface: SurfaceId,
    pub meta: PictureMeta,
    lease: Option<PoolLease>,
}

impl Picture {
    /// Picture over a surface owned by someone else (e.g. the decoder).
    pub fn new(surface: SurfaceId, meta: PictureMeta) -> Self {
        Self {
            surface,
            meta,
            lease: None,
        }
    }

    pub(crate) fn leased(surface: SurfaceId, lease: PoolLease) -> Self {
        Self {
            surface,
            meta: PictureMeta::default(),
            lease: Some(lease),
        }
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    pub fn copy_properties(&mut self, src: &Picture) {
        self.meta = src.meta;
    }
}
