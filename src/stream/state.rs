// State shared between the capture thread(s), the conversion worker and the dispatcher

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::frame::{FrameBuffer, ReleaseToken, RetainedFrame};

/// Mailbox plus readiness flags.
///
/// The mailbox is the only locked state; readiness, in-flight and stop flags
/// are atomics so producers never wait on them. Anything that changes a flag
/// the worker sleeps on goes through `notify_worker`, which takes the mailbox
/// lock first so a wakeup cannot slip between the worker's check and its wait.
pub(crate) struct StreamShared {
    pub(crate) mailbox: Mutex<RetainedFrame>,
    pub(crate) wake: Condvar,
    pub(crate) stop_worker: AtomicBool,
    pub(crate) viewer_ready: AtomicBool,
    pub(crate) broadcast_pending: AtomicBool,
    /// Bumped on every worker reset; broadcasts from an older worker are dropped
    generation: AtomicU64,
}

impl StreamShared {
    pub(crate) fn new() -> Self {
        Self {
            mailbox: Mutex::new(RetainedFrame::new()),
            wake: Condvar::new(),
            stop_worker: AtomicBool::new(false),
            viewer_ready: AtomicBool::new(true),
            broadcast_pending: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the mailbox content. The dropped predecessor is released after the lock is gone.
    pub(crate) fn push(&self, frame: FrameBuffer, release: ReleaseToken) {
        let previous = {
            let mut slot = self.mailbox.lock();
            let previous = slot.replace(frame, release);
            self.wake.notify_all();
            previous
        };
        if let Some(previous) = previous {
            log::trace!("[Stream] Dropping frame {} (superseded)", previous.frame_id());
            previous.release();
        }
    }

    /// Release whatever the mailbox still holds
    pub(crate) fn release_pending(&self) {
        let pending = self.mailbox.lock().evict();
        if let Some(pending) = pending {
            log::debug!("[Stream] Releasing held frame {}", pending.frame_id());
            pending.release();
        }
    }

    pub(crate) fn notify_worker(&self) {
        let _slot = self.mailbox.lock();
        self.wake.notify_all();
    }

    /// True when a converted frame could be handed off right now
    pub(crate) fn can_broadcast(&self) -> bool {
        self.viewer_ready.load(Ordering::SeqCst) && !self.broadcast_pending.load(Ordering::SeqCst)
    }

    /// A viewer acknowledged its last frame or a new viewer connected
    pub(crate) fn mark_viewer_ready(&self) {
        self.viewer_ready.store(true, Ordering::SeqCst);
        self.notify_worker();
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Runs where the broadcast executes. Clears the in-flight flag and returns
    /// whether the frame may go out; sending consumes viewer readiness.
    ///
    /// A broadcast queued before the last reset is refused and leaves every
    /// flag alone, since they belong to the current worker.
    pub(crate) fn begin_delivery(&self, generation: u64) -> bool {
        if generation != self.generation() {
            return false;
        }
        self.broadcast_pending.store(false, Ordering::SeqCst);
        let send = self.viewer_ready.swap(false, Ordering::SeqCst);
        self.notify_worker();
        send
    }

    /// Reset flags for a fresh worker
    pub(crate) fn reset_for_worker(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_worker.store(false, Ordering::SeqCst);
        self.viewer_ready.store(true, Ordering::SeqCst);
        self.broadcast_pending.store(false, Ordering::SeqCst);
    }
}
