//! # Deinterlace History
//!
//! Sliding window of recent frames around the one being deinterlaced.
//!
//! ```text
//!  index:   0 .. forward-1 | forward | forward+1 .. forward+backward
//!           past frames    | center  | future frames
//! ```
//!
//! The center is always index `forward_count`. Once the window is full each
//! push evicts the oldest frame, so the center slides one frame per push.

use std::collections::VecDeque;

use crate::frame::Picture;
use crate::va::SurfaceId;

pub struct HistoryWindow<T> {
    frames: VecDeque<T>,
    backward_count: usize,
    forward_count: usize,
}

impl<T> HistoryWindow<T> {
    pub fn new(backward_count: usize, forward_count: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(backward_count + 1 + forward_count),
            backward_count,
            forward_count,
        }
    }

    pub fn capacity(&self) -> usize {
        self.backward_count + 1 + self.forward_count
    }

    pub fn backward_count(&self) -> usize {
        self.backward_count
    }

    pub fn forward_count(&self) -> usize {
        self.forward_count
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity()
    }

    /// Append `frame`, evicting the oldest one if the window is full.
    /// Returns the centered frame once the window is full, `None` while
    /// still buffering.
    pub fn push(&mut self, frame: T) -> Option<&T> {
        if self.is_full() {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        self.center()
    }

    pub fn center(&self) -> Option<&T> {
        if self.is_full() {
            self.frames.get(self.forward_count)
        } else {
            None
        }
    }

    /// Frames after the center, closest first.
    pub fn backward(&self) -> impl Iterator<Item = &T> + '_ {
        let range = if self.is_full() {
            let start = self.forward_count + 1;
            start..start + self.backward_count
        } else {
            0..0
        };
        self.frames.range(range)
    }

    /// Frames before the center, closest first.
    pub fn forward(&self) -> impl Iterator<Item = &T> + '_ {
        let count = if self.is_full() { self.forward_count } else { 0 };
        self.frames.range(0..count).rev()
    }

    /// Drop every held frame and go back to buffering.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.frames.iter()
    }
}

/// Reference surfaces handed to the pipeline for one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLists {
    pub backward: Vec<SurfaceId>,
    pub forward: Vec<SurfaceId>,
}

impl ReferenceLists {
    pub fn new(backward_count: usize, forward_count: usize) -> Self {
        Self {
            backward: vec![SurfaceId::INVALID; backward_count],
            forward: vec![SurfaceId::INVALID; forward_count],
        }
    }

    /// Refill both lists from a full window. Returns false (lists untouched)
    /// while the window is still buffering.
    pub fn update(&mut self, history: &HistoryWindow<Picture>) -> bool {
        if !history.is_full() {
            return false;
        }
        for (slot, pic) in self.backward.iter_mut().zip(history.backward()) {
            *slot = pic.surface();
        }
        for (slot, pic) in self.forward.iter_mut().zip(history.forward()) {
            *slot = pic.surface();
        }
        true
    }
}
