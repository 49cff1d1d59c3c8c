// Single-use release capability for a captured frame

use std::fmt;

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// The obligation to give a frame buffer back to its capture source.
///
/// `release` consumes the token, so a token cannot be released twice. A token
/// that is dropped without being released still runs its callback (so the
/// source never loses the buffer slot) and logs a warning, since that path
/// means a consumer forgot its part of the handoff.
pub struct ReleaseToken {
    frame_id: u64,
    callback: Option<ReleaseFn>,
}

impl ReleaseToken {
    pub fn new<F>(frame_id: u64, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            frame_id,
            callback: Some(Box::new(callback)),
        }
    }

    /// A token with nothing to give back (synthetic frames, tests)
    pub fn noop(frame_id: u64) -> Self {
        Self {
            frame_id,
            callback: None,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Give the buffer back to the source
    pub fn release(mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            log::warn!(
                "Release token for frame {} dropped without release, releasing now",
                self.frame_id
            );
            callback();
        }
    }
}

impl fmt::Debug for ReleaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseToken")
            .field("frame_id", &self.frame_id)
            .field("pending", &self.callback.is_some())
            .finish()
    }
}
