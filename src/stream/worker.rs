// Conversion worker: mailbox -> RGB -> JPEG -> dispatcher
//
// The worker only takes a frame when a viewer is ready and no broadcast is in
// flight, so at viewer rate it converts exactly what will be sent and every
// intermediate frame is dropped in the mailbox without being converted.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::MutexGuard;

use super::dispatch::DispatchCommand;
use super::message::encode_frame_message;
use super::state::StreamShared;
use super::StreamEvent;
use crate::convert::{encode_jpeg, FrameConverter};
use crate::events::EventBus;
use crate::frame::{FrameBuffer, ReleaseToken};

pub(crate) struct WorkerContext {
    pub(crate) shared: Arc<StreamShared>,
    pub(crate) converter: Arc<dyn FrameConverter>,
    pub(crate) jpeg_quality: u8,
    pub(crate) dispatch: Sender<DispatchCommand>,
    pub(crate) events: Arc<EventBus<StreamEvent>>,
}

pub(crate) fn spawn(ctx: WorkerContext) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("framecast-stream-worker".into())
        .spawn(move || run(ctx))
}

fn run(ctx: WorkerContext) {
    log::debug!("[Stream] Worker started");
    let shared = ctx.shared.clone();
    let mut slot = shared.mailbox.lock();

    loop {
        if shared.stop_worker.load(Ordering::SeqCst) {
            break;
        }
        if !slot.is_occupied() || !shared.can_broadcast() {
            shared.wake.wait(&mut slot);
            continue;
        }
        let Some((frame, release)) = slot.take() else {
            continue;
        };
        MutexGuard::unlocked(&mut slot, || ctx.process(frame, release));
    }

    log::debug!("[Stream] Worker stopped");
}

impl WorkerContext {
    fn process(&self, frame: FrameBuffer, release: ReleaseToken) {
        let converted = self.converter.convert(&frame);
        // The RGB copy is owned, the camera buffer can go back now
        release.release();

        let image = match converted {
            Ok(image) if image.width() > 0 && image.height() > 0 => image,
            Ok(_) => {
                log::debug!("[Stream] Frame {} converted to an empty image, skipped", frame.frame_id);
                return;
            }
            Err(e) => {
                log::debug!("[Stream] Frame {} skipped: {}", frame.frame_id, e);
                return;
            }
        };

        let jpeg = match encode_jpeg(&image, self.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::warn!("[Stream] Frame {} JPEG encode failed: {}", frame.frame_id, e);
                return;
            }
        };
        let message = encode_frame_message(frame.width, frame.height, frame.frame_id, &jpeg);

        let command = DispatchCommand::Broadcast {
            generation: self.shared.generation(),
            message,
        };
        if !self.shared.broadcast_pending.swap(true, Ordering::SeqCst)
            && self.dispatch.send(command).is_err()
        {
            // Dispatcher is gone (shutting down)
            self.shared.broadcast_pending.store(false, Ordering::SeqCst);
        }

        self.events.emit(StreamEvent::FrameConverted {
            frame_id: frame.frame_id,
            width: frame.width,
            height: frame.height,
            jpeg_bytes: jpeg.len(),
        });
    }
}
