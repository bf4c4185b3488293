//! Clock replacement policy for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Second-chance (clock) replacement over the pool's frames.
///
/// Reference bits are atomics so access recording stays lock-free; the
/// evictable set and the clock hand sit behind a mutex. Whether a frame may
/// actually be victimised is decided by the caller-supplied predicate at
/// eviction time, so pin counts stay authoritative in the frames
/// themselves.
pub struct ClockReplacer {
    /// Number of frames tracked.
    num_frames: usize,
    /// One reference bit per frame.
    reference_bits: Vec<AtomicBool>,
    /// Evictable set and clock hand.
    inner: Mutex<ClockInner>,
}

struct ClockInner {
    evictable: HashSet<FrameId>,
    hand: usize,
}

impl ClockReplacer {
    /// Creates a replacer tracking `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            inner: Mutex::new(ClockInner {
                evictable: HashSet::new(),
                hand: 0,
            }),
        }
    }

    /// Records an access to the frame, granting it a second chance.
    #[inline]
    pub fn record_access(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(true, Ordering::Relaxed);
        }
    }

    /// Adds the frame to or removes it from the evictable set.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        if evictable {
            inner.evictable.insert(frame_id);
        } else {
            inner.evictable.remove(&frame_id);
        }
    }

    /// Selects a victim among evictable frames for which `may_evict`
    /// returns true. The predicate is consulted at selection time so a
    /// frame pinned after being marked evictable is skipped.
    pub fn evict<F>(&self, may_evict: F) -> Option<FrameId>
    where
        F: Fn(FrameId) -> bool,
    {
        let mut inner = self.inner.lock();
        if inner.evictable.is_empty() {
            return None;
        }

        // At most two sweeps: one to clear reference bits, one to pick.
        for _ in 0..(2 * self.num_frames) {
            let hand = inner.hand;
            inner.hand = (hand + 1) % self.num_frames;

            let frame_id = FrameId(hand as u32);
            if !inner.evictable.contains(&frame_id) || !may_evict(frame_id) {
                continue;
            }

            if self.reference_bits[hand].swap(false, Ordering::Relaxed) {
                continue; // had a second chance, spend it
            }

            inner.evictable.remove(&frame_id);
            return Some(frame_id);
        }

        // Every candidate kept its reference bit alive across two sweeps;
        // fall back to any frame the predicate accepts.
        let victim = inner
            .evictable
            .iter()
            .copied()
            .find(|&fid| may_evict(fid))?;
        inner.evictable.remove(&victim);
        Some(victim)
    }

    /// Forgets a frame entirely (when its page is dropped from the pool).
    pub fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.inner.lock().evictable.remove(&frame_id);
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }

    /// Number of frames currently marked evictable.
    pub fn evictable_count(&self) -> usize {
        self.inner.lock().evictable.len()
    }
}
