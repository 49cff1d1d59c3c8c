// "Keep latest" slot: at most one retained frame, replacing releases the predecessor

use super::{FrameBuffer, ReleaseToken};

/// Holds at most one frame together with its release obligation.
///
/// This is meant to live behind the caller's own lock. Operations that evict
/// a frame hand its token back instead of releasing it in place, so the
/// caller can release after dropping the lock.
#[derive(Default)]
pub struct RetainedFrame {
    held: Option<(FrameBuffer, ReleaseToken)>,
}

impl RetainedFrame {
    pub fn new() -> Self {
        Self { held: None }
    }

    /// Store `frame`, returning the evicted predecessor's token (must be released)
    #[must_use = "the evicted frame's token must be released"]
    pub fn replace(&mut self, frame: FrameBuffer, release: ReleaseToken) -> Option<ReleaseToken> {
        self.held
            .replace((frame, release))
            .map(|(_, previous)| previous)
    }

    /// Move the retained frame and its obligation out of the slot
    pub fn take(&mut self) -> Option<(FrameBuffer, ReleaseToken)> {
        self.held.take()
    }

    /// Empty the slot, returning the token to release
    #[must_use = "the evicted frame's token must be released"]
    pub fn evict(&mut self) -> Option<ReleaseToken> {
        self.held.take().map(|(_, release)| release)
    }

    pub fn frame(&self) -> Option<&FrameBuffer> {
        self.held.as_ref().map(|(frame, _)| frame)
    }

    pub fn is_occupied(&self) -> bool {
        self.held.is_some()
    }
}
