//! Mapping between user-facing filter strengths and driver value ranges.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::va::ValueRange;

/// A closed, non-degenerate `[min, max]` interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    min: f32,
    max: f32,
}

impl Range {
    /// `None` for non-finite bounds or `min >= max`.
    pub fn new(min: f32, max: f32) -> Option<Self> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return None;
        }
        Some(Self { min, max })
    }

    /// For compile-time tables; bounds are checked by the tests below.
    pub(crate) const fn fixed(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Driver-side range. A zero-width range is allowed here (every value maps
/// onto the single point); inverted or non-finite ranges are not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub min: f32,
    pub max: f32,
}

impl TargetRange {
    pub fn from_driver(range: &ValueRange) -> Option<Self> {
        if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
            return None;
        }
        Some(Self {
            min: range.min,
            max: range.max,
        })
    }
}

impl From<Range> for TargetRange {
    fn from(range: Range) -> Self {
        Self {
            min: range.min,
            max: range.max,
        }
    }
}

/// Linear map of `value` from `domain` onto `target`.
pub fn map(value: f32, domain: Range, target: TargetRange) -> f32 {
    (value - domain.min) * (target.max - target.min) / (domain.max - domain.min) + target.min
}

/// Sub-ranges that make the hardware color balance look like the software
/// adjust filter at the same setting.
const CONTRAST_VISUAL_RANGE: Range = Range::fixed(0.0, 0.35);
const SATURATION_VISUAL_RANGE: Range = Range::fixed(0.0, 1.0);

/// Re-express an adjust sigma against the visual-match sub-range of its
/// channel. Channels without a correction are returned unchanged.
pub fn adapt_adjust_sigma(name: &str, sigma: f32, logical: Range) -> f32 {
    match name {
        "contrast" => map(sigma, logical, CONTRAST_VISUAL_RANGE.into()),
        "saturation" => map(sigma, logical, SATURATION_VISUAL_RANGE.into()),
        _ => sigma,
    }
}

/// Clamp, optionally adapt, then map a logical sigma into the driver range.
pub fn driver_sigma(
    name: &str,
    sigma: f32,
    logical: Range,
    driver: TargetRange,
    adapt: bool,
) -> f32 {
    let mut sigma = logical.clamp(sigma);
    if adapt {
        sigma = adapt_adjust_sigma(name, sigma, logical);
    }
    map(sigma, logical, driver)
}

/// Live driver value shared between the change notifier (writer) and the
/// submission path (reader). Stored as `f32` bits.
#[derive(Debug)]
pub struct SigmaCell(AtomicU32);

impl SigmaCell {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}
