// Capture-side fan-out
//
// The capture source delivers every frame to all registered processors. Each
// processor gets its own release token; the source's buffer is requeued only
// after the last processor has released.

pub mod test_pattern;

pub use test_pattern::{TestPatternConfig, TestPatternSource};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::frame::{FrameBuffer, FrameProcessor, ReleaseToken};

type RequeueFn = Box<dyn FnOnce() + Send + 'static>;

/// Countdown shared by all tokens handed out for one buffer
struct PendingRelease {
    frame_id: u64,
    remaining: AtomicUsize,
    requeue: Mutex<Option<RequeueFn>>,
}

impl PendingRelease {
    fn release_one(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                if let Some(requeue) = self.requeue.lock().take() {
                    requeue();
                }
            }
            Ok(_) => {}
            Err(_) => {
                log::error!(
                    "Frame {} released more times than it was handed out",
                    self.frame_id
                );
            }
        }
    }
}

/// Registry of frame processors for one capture source
#[derive(Default)]
pub struct FrameObserver {
    processors: RwLock<Vec<Arc<dyn FrameProcessor>>>,
}

impl FrameObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processor(&self, processor: Arc<dyn FrameProcessor>) {
        self.processors.write().push(processor);
    }

    pub fn clear(&self) {
        self.processors.write().clear();
    }

    pub fn processor_count(&self) -> usize {
        self.processors.read().len()
    }

    /// Hand `frame` to every processor. `requeue` runs once all of them have released.
    pub fn deliver<F>(&self, frame: FrameBuffer, requeue: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Snapshot the list so processors can register/unregister from callbacks
        let processors: Vec<Arc<dyn FrameProcessor>> = self.processors.read().clone();
        if processors.is_empty() {
            requeue();
            return;
        }

        let pending = Arc::new(PendingRelease {
            frame_id: frame.frame_id,
            remaining: AtomicUsize::new(processors.len()),
            requeue: Mutex::new(Some(Box::new(requeue))),
        });

        for processor in processors {
            let pending = pending.clone();
            let token = ReleaseToken::new(frame.frame_id, move || pending.release_one());
            processor.process(frame.clone(), token);
        }
    }
}

/// Forwards frames to `inner` only while the gate is open; otherwise releases at once
pub struct Gated {
    gate: Arc<AtomicBool>,
    inner: Arc<dyn FrameProcessor>,
}

impl Gated {
    pub fn new(gate: Arc<AtomicBool>, inner: Arc<dyn FrameProcessor>) -> Self {
        Self { gate, inner }
    }
}

impl FrameProcessor for Gated {
    fn process(&self, frame: FrameBuffer, release: ReleaseToken) {
        if self.gate.load(Ordering::SeqCst) {
            self.inner.process(frame, release);
        } else {
            release.release();
        }
    }
}
