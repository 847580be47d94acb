//! Accounting for per-frame scratch buffers.
//!
//! Every intermediate buffer created while processing a frame is wrapped in
//! a [`Scoped`] guard. Dropping the guard, on any exit path, returns its
//! bytes to the tracker, so peak usage reflects one frame's working set no
//! matter how long the segment is.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{ImageBuffer, Pixel};
use ndarray::Array2;

use super::consistency::PreviousOutput;
use super::controls::ControlSignals;
use crate::frame::Mask;
use crate::imaging::FlowField;

/// Approximate heap size of a buffer.
pub trait BufferFootprint {
    fn footprint_bytes(&self) -> usize;
}

impl<P: Pixel> BufferFootprint for ImageBuffer<P, Vec<P::Subpixel>> {
    fn footprint_bytes(&self) -> usize {
        self.as_raw().len() * std::mem::size_of::<P::Subpixel>()
    }
}

impl BufferFootprint for Array2<f32> {
    fn footprint_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }
}

impl BufferFootprint for Mask {
    fn footprint_bytes(&self) -> usize {
        self.image().footprint_bytes()
    }
}

impl BufferFootprint for ControlSignals {
    fn footprint_bytes(&self) -> usize {
        self.pose.footprint_bytes() + self.depth.footprint_bytes() + self.edges.footprint_bytes()
    }
}

impl BufferFootprint for FlowField {
    fn footprint_bytes(&self) -> usize {
        self.u.footprint_bytes() + self.v.footprint_bytes()
    }
}

impl BufferFootprint for PreviousOutput {
    fn footprint_bytes(&self) -> usize {
        self.source_luma.footprint_bytes() + self.image.footprint_bytes()
    }
}

#[derive(Debug, Default)]
struct Counters {
    live: AtomicUsize,
    peak: AtomicUsize,
    acquisitions: AtomicUsize,
}

/// Shared counter of live and peak scratch bytes.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    counters: Arc<Counters>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accounting for `value` until the returned guard is dropped.
    pub fn track<T: BufferFootprint>(&self, value: T) -> Scoped<T> {
        let bytes = value.footprint_bytes();
        let live = self.counters.live.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        Scoped {
            value,
            lease: Lease {
                counters: Arc::clone(&self.counters),
                bytes,
            },
        }
    }

    /// Bytes currently held by live guards.
    pub fn live_bytes(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest `live_bytes` seen since creation or the last reset.
    pub fn peak_bytes(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Total number of buffers ever tracked.
    pub fn acquisitions(&self) -> usize {
        self.counters.acquisitions.load(Ordering::Relaxed)
    }

    pub fn reset_peak(&self) {
        self.counters
            .peak
            .store(self.live_bytes(), Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Lease {
    counters: Arc<Counters>,
    bytes: usize,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

/// A tracked buffer. Releases its accounting when dropped.
#[derive(Debug)]
pub struct Scoped<T> {
    value: T,
    lease: Lease,
}

impl<T> Scoped<T> {
    /// Stop tracking and take the buffer out.
    pub fn into_inner(self) -> T {
        let Scoped { value, lease } = self;
        drop(lease);
        value
    }

    pub fn bytes(&self) -> usize {
        self.lease.bytes
    }
}

impl<T> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    #[test]
    fn test_drop_releases_bytes() {
        let tracker = ResourceTracker::new();
        {
            let a = tracker.track(RgbImage::new(10, 10));
            assert_eq!(a.bytes(), 300);
            let _b = tracker.track(GrayImage::new(10, 10));
            assert_eq!(tracker.live_bytes(), 400);
        }
        assert_eq!(tracker.live_bytes(), 0);
        assert_eq!(tracker.peak_bytes(), 400);
        assert_eq!(tracker.acquisitions(), 2);
    }

    #[test]
    fn test_into_inner_releases_but_keeps_value() {
        let tracker = ResourceTracker::new();
        let scoped = tracker.track(Array2::<f32>::zeros((4, 4)));
        assert_eq!(tracker.live_bytes(), 64);
        let value = scoped.into_inner();
        assert_eq!(value.len(), 16);
        assert_eq!(tracker.live_bytes(), 0);
    }

    #[test]
    fn test_release_on_early_return() {
        fn fails(tracker: &ResourceTracker) -> Result<(), ()> {
            let _scratch = tracker.track(RgbImage::new(8, 8));
            Err(())
        }
        let tracker = ResourceTracker::new();
        assert!(fails(&tracker).is_err());
        assert_eq!(tracker.live_bytes(), 0);
        assert_eq!(tracker.peak_bytes(), 192);

        tracker.reset_peak();
        assert_eq!(tracker.peak_bytes(), 0);
    }
}
