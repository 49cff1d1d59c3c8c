// Capture pipeline: one observer fanning out to every consumer
//
//   source -> observer -> info tracker
//                      -> [gate] stream engine
//                      -> [gate] snapshot
//                      -> recording processor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capture::{FrameObserver, Gated};
use crate::info::FrameInfoTracker;
use crate::recording::{RecordingProcessor, RecordingSummary, VideoRecorder};
use crate::snapshot::FrameSnapshot;
use crate::stream::{StreamConfig, StreamEngine, StreamError};

pub struct CapturePipeline {
    observer: Arc<FrameObserver>,
    stream: Arc<StreamEngine>,
    recorder: Arc<VideoRecorder>,
    snapshot: Arc<FrameSnapshot>,
    info: Arc<FrameInfoTracker>,
    streaming: Arc<AtomicBool>,
}

impl CapturePipeline {
    pub fn new(stream_config: StreamConfig, recording_jpeg_quality: u8) -> Self {
        let observer = Arc::new(FrameObserver::new());
        let stream = Arc::new(StreamEngine::new(stream_config));
        let recorder = Arc::new(VideoRecorder::new());
        let snapshot = Arc::new(FrameSnapshot::new());
        let info = Arc::new(FrameInfoTracker::new());
        let streaming = Arc::new(AtomicBool::new(false));

        observer.add_processor(info.clone());
        observer.add_processor(Arc::new(Gated::new(streaming.clone(), stream.clone())));
        observer.add_processor(Arc::new(Gated::new(streaming.clone(), snapshot.clone())));
        observer.add_processor(Arc::new(RecordingProcessor::new(
            recorder.clone(),
            recording_jpeg_quality,
        )));

        Self {
            observer,
            stream,
            recorder,
            snapshot,
            info,
            streaming,
        }
    }

    /// Observer to hand to the capture source
    pub fn observer(&self) -> Arc<FrameObserver> {
        self.observer.clone()
    }

    pub fn stream(&self) -> &Arc<StreamEngine> {
        &self.stream
    }

    pub fn recorder(&self) -> &Arc<VideoRecorder> {
        &self.recorder
    }

    pub fn snapshot(&self) -> &Arc<FrameSnapshot> {
        &self.snapshot
    }

    pub fn info(&self) -> &Arc<FrameInfoTracker> {
        &self.info
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Start the stream server if needed and let frames through to it. Returns the port.
    pub fn start_streaming(&self) -> Result<u16, StreamError> {
        let port = match self.stream.port() {
            Some(port) => port,
            None => self.stream.start()?,
        };
        self.streaming.store(true, Ordering::SeqCst);
        Ok(port)
    }

    /// Close the gates and drop anything retained. The server keeps listening.
    pub fn stop_streaming(&self) -> Result<(), StreamError> {
        self.streaming.store(false, Ordering::SeqCst);
        self.snapshot.release();
        self.stream.flush()
    }

    /// Stop everything. Returns the summary of a recording that was still open.
    pub fn shutdown(&self) -> Option<RecordingSummary> {
        self.streaming.store(false, Ordering::SeqCst);
        let summary = match self.recorder.stop() {
            Ok(summary) => summary,
            Err(e) => {
                log::error!("Failed to finalize recording on shutdown: {}", e);
                None
            }
        };
        self.stream.stop();
        self.snapshot.release();
        self.observer.clear();
        summary
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
