// Throttled frame statistics
//
// Records the latest frame geometry on the capture thread without holding
// the frame; readers poll for changes at their own pace.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::frame::{FrameBuffer, FrameProcessor, ReleaseToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    /// Frames observed since the previous update was taken
    pub frames_since_last: u64,
}

#[derive(Default)]
pub struct FrameInfoTracker {
    frame_id: AtomicU64,
    width: AtomicU32,
    height: AtomicU32,
    seen: AtomicU64,
    reported: AtomicU64,
    dirty: AtomicBool,
}

impl FrameInfoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest info, or `None` if nothing arrived since the last call
    pub fn take_update(&self) -> Option<FrameInfo> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        let seen = self.seen.load(Ordering::Acquire);
        let previous = self.reported.swap(seen, Ordering::AcqRel);
        Some(FrameInfo {
            frame_id: self.frame_id.load(Ordering::Acquire),
            width: self.width.load(Ordering::Acquire),
            height: self.height.load(Ordering::Acquire),
            frames_since_last: seen.saturating_sub(previous),
        })
    }

    pub fn frames_seen(&self) -> u64 {
        self.seen.load(Ordering::Acquire)
    }
}

impl FrameProcessor for FrameInfoTracker {
    fn process(&self, frame: FrameBuffer, release: ReleaseToken) {
        self.frame_id.store(frame.frame_id, Ordering::Release);
        self.width.store(frame.width, Ordering::Release);
        self.height.store(frame.height, Ordering::Release);
        self.seen.fetch_add(1, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);
        release.release();
    }
}
