// Capture-side adapter feeding the recorder

use std::sync::Arc;

use super::{RecorderError, RecordingFormat, VideoRecorder};
use crate::convert::{encode_jpeg, FrameConverter, PixelConverter};
use crate::frame::{FrameBuffer, FrameProcessor, PixelFormat, ReleaseToken};

/// Writes every captured frame into the active recording session.
///
/// Runs on the capture thread. Each path releases the frame exactly once:
/// right away when idle, after the copy into the file for pass-through
/// data, or after conversion when the frame must be compressed first.
pub struct RecordingProcessor {
    recorder: Arc<VideoRecorder>,
    converter: Arc<dyn FrameConverter>,
    jpeg_quality: u8,
}

impl RecordingProcessor {
    pub fn new(recorder: Arc<VideoRecorder>, jpeg_quality: u8) -> Self {
        Self::with_converter(recorder, Arc::new(PixelConverter), jpeg_quality)
    }

    pub fn with_converter(
        recorder: Arc<VideoRecorder>,
        converter: Arc<dyn FrameConverter>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            recorder,
            converter,
            jpeg_quality,
        }
    }

    fn record_jpeg(&self, frame: &FrameBuffer, release: ReleaseToken) -> Result<(), RecorderError> {
        if frame.pixel_format == PixelFormat::MJPEG {
            let result = self.recorder.write_encoded_frame(frame.payload());
            release.release();
            return result;
        }

        let converted = self.converter.convert(frame);
        release.release();
        match converted.and_then(|image| encode_jpeg(&image, self.jpeg_quality)) {
            Ok(jpeg) => self.recorder.write_encoded_frame(&jpeg),
            Err(e) => {
                log::debug!("[Recorder] Frame {} not recorded: {}", frame.frame_id, e);
                Ok(())
            }
        }
    }
}

impl FrameProcessor for RecordingProcessor {
    fn process(&self, frame: FrameBuffer, release: ReleaseToken) {
        let result = match self.recorder.format() {
            None => {
                release.release();
                return;
            }
            Some(RecordingFormat::AviMjpeg) => self.record_jpeg(&frame, release),
            Some(RecordingFormat::Raw) => {
                let result = self.recorder.write_raw_frame(frame.payload());
                release.release();
                result
            }
        };

        match result {
            Ok(()) => {}
            // Session ended between the format check and the write
            Err(RecorderError::NotRecording) => {}
            Err(e) => log::warn!("[Recorder] Frame {} dropped: {}", frame.frame_id, e),
        }
    }
}
