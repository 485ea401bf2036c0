//! # Capability Probe
//!
//! Opens a throwaway video processing context and asks the driver what it
//! offers, without building any filter.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::filter::{FilterKind, MODULES};
use crate::frame::VideoFormat;
use crate::lifecycle::Scoped;
use crate::pool::SurfacePool;
use crate::va::{
    ColorBalanceCap, ContextId, DeinterlaceAlgorithm, FilterCaps, FilterParam, FilterType,
    VaError, VaSession, ValueRange,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCounts {
    pub backward: u32,
    pub forward: u32,
}

/// What the video processing entrypoint offers for one format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VppCapabilities {
    pub filters: Vec<FilterType>,
    pub noise_reduction: Option<ValueRange>,
    pub sharpening: Option<ValueRange>,
    pub color_balance: Vec<ColorBalanceCap>,
    pub deinterlacing: Vec<DeinterlaceAlgorithm>,
    /// Reference frames the first deinterlacing algorithm asks for
    pub deinterlace_references: Option<ReferenceCounts>,
}

impl VppCapabilities {
    /// Shortcuts of the filter modules this device can run.
    pub fn usable_modules(&self) -> Vec<&'static str> {
        MODULES
            .iter()
            .filter(|m| match m.kind {
                FilterKind::Adjust => !self.color_balance.is_empty(),
                FilterKind::Deinterlace => !self.deinterlacing.is_empty(),
                FilterKind::Basic(kind) => match kind.filter_type() {
                    FilterType::NoiseReduction => self.noise_reduction.is_some(),
                    _ => self.sharpening.is_some(),
                },
            })
            .map(|m| m.shortcut)
            .collect()
    }
}

pub fn probe_capabilities(
    session: &Arc<dyn VaSession>,
    format: &VideoFormat,
) -> Result<VppCapabilities, VaError> {
    let pool = SurfacePool::new(Arc::clone(session), 1, format)?;
    let config = Scoped::config(session)?;
    let context = Scoped::context(session, config.config_id(), format, &pool)?;
    let ctx = context.context_id();

    let mut caps = VppCapabilities {
        filters: session.query_filters(ctx)?,
        ..Default::default()
    };

    for filter in caps.filters.clone() {
        let filter_caps = match session.query_filter_caps(ctx, filter) {
            Ok(filter_caps) => filter_caps,
            Err(e) => {
                tracing::warn!("{:?}: caps query failed: {}", filter, e);
                continue;
            }
        };
        match (filter, filter_caps) {
            (FilterType::NoiseReduction, FilterCaps::Range(ranges)) => {
                caps.noise_reduction = ranges.first().copied();
            }
            (FilterType::Sharpening, FilterCaps::Range(ranges)) => {
                caps.sharpening = ranges.first().copied();
            }
            (FilterType::ColorBalance, FilterCaps::ColorBalance(channels)) => {
                caps.color_balance = channels;
            }
            (FilterType::Deinterlacing, FilterCaps::Deinterlacing(algorithms)) => {
                caps.deinterlacing = algorithms;
            }
            (filter, other) => {
                tracing::debug!("{:?}: unexpected caps shape {:?}", filter, other);
            }
        }
    }

    if let Some(&algorithm) = caps.deinterlacing.first() {
        caps.deinterlace_references = Some(deinterlace_references(session, ctx, algorithm)?);
    }

    tracing::debug!("probe: {} filters offered", caps.filters.len());
    Ok(caps)
}

fn deinterlace_references(
    session: &Arc<dyn VaSession>,
    context: ContextId,
    algorithm: DeinterlaceAlgorithm,
) -> Result<ReferenceCounts, VaError> {
    let param = FilterParam::Deinterlacing {
        algorithm,
        flags: 0,
    };
    let buffer = Scoped::filter_buffer(session, context, &[param])?;
    let pipeline = session.query_pipeline_caps(context, &[buffer.buffer_id()])?;
    Ok(ReferenceCounts {
        backward: pipeline.num_backward_references,
        forward: pipeline.num_forward_references,
    })
}
