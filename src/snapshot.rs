// Latest-frame snapshot
//
// Keeps the newest captured frame so it can be written out on request.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::convert::{ConvertError, FrameConverter, PixelConverter};
use crate::frame::{FrameBuffer, FrameProcessor, ReleaseToken, RetainedFrame};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("No frame captured yet")]
    NoFrame,

    #[error("Unknown snapshot format: {0}")]
    UnknownFormat(String),

    #[error("Conversion failed: {0}")]
    Convert(#[from] ConvertError),

    #[error("Image write failed: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// Converted to RGB and written as PNG
    Png,
    /// Payload bytes exactly as captured
    Raw,
}

impl SnapshotFormat {
    /// Pick a format from the file extension
    pub fn from_path(path: &Path) -> Result<Self, SnapshotError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => Ok(SnapshotFormat::Png),
            "raw" | "bin" => Ok(SnapshotFormat::Raw),
            other => Err(SnapshotError::UnknownFormat(other.to_string())),
        }
    }
}

/// Owned copy taken under the lock, written after it is dropped
enum Pending {
    Image(image::RgbImage),
    Bytes(Vec<u8>),
}

pub struct FrameSnapshot {
    slot: Mutex<RetainedFrame>,
    converter: Arc<dyn FrameConverter>,
}

impl FrameSnapshot {
    pub fn new() -> Self {
        Self::with_converter(Arc::new(PixelConverter))
    }

    pub fn with_converter(converter: Arc<dyn FrameConverter>) -> Self {
        Self {
            slot: Mutex::new(RetainedFrame::new()),
            converter,
        }
    }

    pub fn latest_frame_id(&self) -> Option<u64> {
        self.slot.lock().frame().map(|f| f.frame_id)
    }

    /// Write the retained frame to `path`
    pub fn save(&self, path: &Path, format: SnapshotFormat) -> Result<(), SnapshotError> {
        let pending = {
            let slot = self.slot.lock();
            let frame = slot.frame().ok_or(SnapshotError::NoFrame)?;
            match format {
                SnapshotFormat::Png => Pending::Image(self.converter.convert(frame)?),
                SnapshotFormat::Raw => Pending::Bytes(frame.payload().to_vec()),
            }
        };

        match pending {
            Pending::Image(image) => image
                .save_with_format(path, image::ImageFormat::Png)
                .map_err(|e| SnapshotError::Image(e.to_string()))?,
            Pending::Bytes(bytes) => std::fs::write(path, bytes)?,
        }
        log::info!("Snapshot saved to {}", path.display());
        Ok(())
    }

    /// Release the retained frame
    pub fn release(&self) {
        let evicted = self.slot.lock().evict();
        if let Some(token) = evicted {
            token.release();
        }
    }
}

impl Default for FrameSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProcessor for FrameSnapshot {
    fn process(&self, frame: FrameBuffer, release: ReleaseToken) {
        let previous = self.slot.lock().replace(frame, release);
        if let Some(previous) = previous {
            previous.release();
        }
    }
}

impl Drop for FrameSnapshot {
    fn drop(&mut self) {
        self.release();
    }
}
