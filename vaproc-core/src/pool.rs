//! # Surface Pool
//!
//! Bounded pool of accelerator surfaces handed out as [`Picture`]s.
//!
//! - Fixed capacity, allocated up front
//! - Round-robin reuse: released slots go to the back of the free list
//! - Never blocks: an exhausted pool returns `None`
//! - Surfaces are destroyed once the pool and every outstanding picture
//!   are gone

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::frame::{Picture, VideoFormat};
use crate::va::{SurfaceId, VaError, VaSession};

pub struct SurfacePool {
    session: Arc<dyn VaSession>,
    surfaces: Vec<SurfaceId>,
    free: Mutex<VecDeque<usize>>,
    format: VideoFormat,
    acquired: AtomicU64,
    exhausted: AtomicU64,
}

impl SurfacePool {
    /// Allocate `capacity` surfaces of `format`.
    pub fn new(
        session: Arc<dyn VaSession>,
        capacity: usize,
        format: &VideoFormat,
    ) -> Result<Arc<Self>, VaError> {
        if capacity == 0 {
            return Err(VaError::Unsupported("empty surface pool".into()));
        }

        let surfaces = session.create_surfaces(format, capacity)?;
        if surfaces.len() != capacity {
            session.destroy_surfaces(&surfaces);
            return Err(VaError::Unsupported(format!(
                "asked for {} surfaces, got {}",
                capacity,
                surfaces.len()
            )));
        }

        tracing::debug!(
            "surface pool: {} x {}x{} {}",
            capacity,
            format.width,
            format.height,
            format.chroma.as_str()
        );

        Ok(Arc::new(Self {
            session,
            surfaces,
            free: Mutex::new((0..capacity).collect()),
            format: *format,
            acquired: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }))
    }

    /// Take the next free surface, or `None` if every one is in flight.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Picture> {
        let Some(slot) = self.free.lock().pop_front() else {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.acquired.fetch_add(1, Ordering::Relaxed);

        let lease = PoolLease {
            pool: Arc::clone(self),
            slot,
        };
        Some(Picture::leased(self.surfaces[slot], lease))
    }

    fn release(&self, slot: usize) {
        self.free.lock().push_back(slot);
    }

    pub fn surface_ids(&self) -> &[SurfaceId] {
        &self.surfaces
    }

    pub fn capacity(&self) -> usize {
        self.surfaces.len()
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.surfaces.len(),
            available: self.free.lock().len(),
            total_acquired: self.acquired.load(Ordering::Relaxed),
            total_exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SurfacePool {
    fn drop(&mut self) {
        self.session.destroy_surfaces(&self.surfaces);
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub total_acquired: u64,
    pub total_exhausted: u64,
}

/// A picture's claim on its pool slot.
pub struct PoolLease {
    pool: Arc<SurfacePool>,
    slot: usize,
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

impl fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolLease")
            .field("surface", &self.pool.surfaces[self.slot])
            .field("slot", &self.slot)
            .finish()
    }
}
