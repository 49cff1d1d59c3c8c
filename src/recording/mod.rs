// Recording engine: AVI MJPEG and raw frame streams
//
// All calls are synchronous and run on the caller's thread (normally the
// capture thread via `RecordingProcessor`). One lock guards the open file
// and the frame index, so a stop from one thread cannot interleave with a
// write from another.

pub mod avi;
pub mod probe;
pub mod processor;
pub mod raw;

pub use probe::{probe_avi, probe_raw, AviProbe, RawProbe};
pub use processor::RecordingProcessor;

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::events::EventBus;
use avi::IndexEntry;

/// Progress is reported every this many frames
const PROGRESS_INTERVAL: u32 = 10;

/// Error type for the recorder
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Session records {session}, cannot accept a {frame} frame")]
    FormatMismatch {
        session: RecordingFormat,
        frame: RecordingFormat,
    },

    #[error("Failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed recording: {0}")]
    Malformed(String),
}

/// Container written by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingFormat {
    /// AVI 1.0 with one MJPEG video stream
    AviMjpeg,
    /// Text header plus concatenated frame payloads
    Raw,
}

impl RecordingFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingFormat::AviMjpeg => "avi",
            RecordingFormat::Raw => "raw",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avi" | "avi_mjpeg" | "mjpeg" => Some(RecordingFormat::AviMjpeg),
            "raw" => Some(RecordingFormat::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for RecordingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingFormat::AviMjpeg => write!(f, "avi_mjpeg"),
            RecordingFormat::Raw => write!(f, "raw"),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Complete,
    SizeLimit,
    WriteFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Complete => write!(f, "complete"),
            StopReason::SizeLimit => write!(f, "size limit reached"),
            StopReason::WriteFailed => write!(f, "write failed"),
        }
    }
}

/// Final state of a finished session
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub format: RecordingFormat,
    pub frame_count: u32,
    /// Final file length
    pub bytes_written: u64,
    pub duration_secs: f64,
    pub reason: StopReason,
}

/// Notifications from the recorder
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    Progress { bytes_written: u64, elapsed_secs: f64 },
    Stopped { reason: StopReason, summary: RecordingSummary },
}

/// Recording settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub format: RecordingFormat,
    /// Nominal frame rate written into the AVI header
    pub fps: f64,
    /// Stop automatically once this many bytes are written (0 = unlimited)
    pub max_bytes: u64,
    /// Quality used when frames must be compressed for AVI
    pub jpeg_quality: u8,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: crate::config::default_recording_dir(),
            format: RecordingFormat::AviMjpeg,
            fps: 30.0,
            max_bytes: 0,
            jpeg_quality: 90,
        }
    }
}

impl RecordingConfig {
    /// Timestamped file name in the output directory
    pub fn next_output_path(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.output_dir
            .join(format!("recording_{}.{}", timestamp, self.format.extension()))
    }
}

struct Session {
    writer: BufWriter<File>,
    path: PathBuf,
    format: RecordingFormat,
    width: u32,
    height: u32,
    max_bytes: u64,
    /// Current end of file
    position: u64,
    frame_count: u32,
    index: Vec<IndexEntry>,
    started: Instant,
}

impl Session {
    fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        match self.format {
            RecordingFormat::AviMjpeg => {
                let offset = self.position - avi::MOVI_DATA_START;
                let written = avi::write_chunk(&mut self.writer, &avi::VIDEO_CHUNK, payload)?;
                self.index.push(IndexEntry {
                    offset: u32::try_from(offset).unwrap_or(u32::MAX),
                    size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                });
                self.position += written;
            }
            RecordingFormat::Raw => {
                self.writer.write_all(payload)?;
                self.position += payload.len() as u64;
            }
        }
        self.frame_count += 1;
        Ok(())
    }

    /// Cut the file back to `position` after a failed append.
    ///
    /// Frames appended before the failure may still sit in the write buffer,
    /// so that valid prefix is kept and written directly to the file.
    fn discard_partial(&mut self) -> io::Result<()> {
        let flushed = self.writer.get_mut().stream_position()?;
        let buffered = self.writer.buffer();
        let keep = usize::try_from(self.position.saturating_sub(flushed))
            .unwrap_or(usize::MAX)
            .min(buffered.len());
        let valid = buffered[..keep].to_vec();

        // Swap in a fresh writer so the stale buffer is dropped without flushing
        let file = self.writer.get_ref().try_clone()?;
        let (_stale, _unflushed) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();

        let end = flushed.min(self.position);
        let file = self.writer.get_mut();
        file.set_len(end)?;
        file.seek(SeekFrom::Start(end))?;
        file.write_all(&valid)?;
        Ok(())
    }

    /// Write trailing metadata and patch the header with the final totals
    fn finalize(&mut self) -> io::Result<()> {
        match self.format {
            RecordingFormat::AviMjpeg => {
                let idx1_pos = self.position;
                let index = avi::index_chunk(&self.index);
                self.writer.write_all(&index)?;
                self.position += index.len() as u64;

                let patches = avi::finalize_patches(self.position, idx1_pos, self.frame_count);
                avi::apply_patches(&mut self.writer, &patches, self.position)?;
            }
            RecordingFormat::Raw => {
                let bytes_per_frame = raw::bytes_per_frame(self.position, self.frame_count);
                let header = raw::header_bytes(self.width, self.height, bytes_per_frame, self.frame_count);
                self.writer.seek(SeekFrom::Start(0))?;
                self.writer.write_all(&header)?;
                self.writer.seek(SeekFrom::Start(self.position))?;
            }
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    fn summary(&self, reason: StopReason) -> RecordingSummary {
        RecordingSummary {
            path: self.path.clone(),
            format: self.format,
            frame_count: self.frame_count,
            bytes_written: self.position,
            duration_secs: self.started.elapsed().as_secs_f64(),
            reason,
        }
    }
}

/// Writes frames into a single file per session
pub struct VideoRecorder {
    session: Mutex<Option<Session>>,
    bytes_written: AtomicU64,
    recording: AtomicBool,
    events: EventBus<RecorderEvent>,
}

impl VideoRecorder {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            bytes_written: AtomicU64::new(0),
            recording: AtomicBool::new(false),
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&self) -> Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Bytes in the current (or last) file, header included
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    /// Format of the active session
    pub fn format(&self) -> Option<RecordingFormat> {
        self.session.lock().as_ref().map(|s| s.format)
    }

    /// Open `path` and write the provisional header.
    ///
    /// `fps <= 0` falls back to 30; `max_bytes == 0` disables the size ceiling.
    pub fn start(
        &self,
        path: impl AsRef<Path>,
        format: RecordingFormat,
        width: u32,
        height: u32,
        fps: f64,
        max_bytes: u64,
    ) -> Result<(), RecorderError> {
        let path = path.as_ref();
        let mut slot = self.session.lock();
        if slot.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let file = File::create(path).map_err(|source| RecorderError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let fps = if fps > 0.0 { fps } else { 30.0 };
        let header = match format {
            RecordingFormat::AviMjpeg => avi::provisional_header(width, height, fps),
            RecordingFormat::Raw => raw::header_bytes(width, height, 0, 0),
        };
        writer.write_all(&header)?;

        let position = header.len() as u64;
        *slot = Some(Session {
            writer,
            path: path.to_path_buf(),
            format,
            width,
            height,
            max_bytes,
            position,
            frame_count: 0,
            index: Vec::new(),
            started: Instant::now(),
        });
        self.bytes_written.store(position, Ordering::SeqCst);
        self.recording.store(true, Ordering::SeqCst);

        log::info!(
            "[Recorder] Started {} recording {}x{} @ {:.2} fps -> {}",
            format,
            width,
            height,
            fps,
            path.display()
        );
        Ok(())
    }

    /// Append one compressed (JPEG) frame to an AVI session
    pub fn write_encoded_frame(&self, jpeg: &[u8]) -> Result<(), RecorderError> {
        self.write_frame(RecordingFormat::AviMjpeg, jpeg)
    }

    /// Append one uncompressed frame to a raw session
    pub fn write_raw_frame(&self, data: &[u8]) -> Result<(), RecorderError> {
        self.write_frame(RecordingFormat::Raw, data)
    }

    /// Finalize and close the file. `Ok(None)` when nothing was recording.
    pub fn stop(&self) -> Result<Option<RecordingSummary>, RecorderError> {
        let mut slot = self.session.lock();
        match slot.take() {
            Some(session) => self.finish(session, StopReason::Complete).map(Some),
            None => Ok(None),
        }
    }

    fn write_frame(&self, kind: RecordingFormat, payload: &[u8]) -> Result<(), RecorderError> {
        let mut slot = self.session.lock();
        let session = slot.as_mut().ok_or(RecorderError::NotRecording)?;
        if session.format != kind {
            return Err(RecorderError::FormatMismatch {
                session: session.format,
                frame: kind,
            });
        }

        if let Err(e) = session.append(payload) {
            log::error!("[Recorder] Write failed: {}", e);
            if let Err(cleanup) = session.discard_partial() {
                log::warn!("[Recorder] Could not trim partial frame: {}", cleanup);
            }
            if let Some(session) = slot.take() {
                let _ = self.finish(session, StopReason::WriteFailed);
            }
            return Err(e.into());
        }

        let position = session.position;
        self.bytes_written.store(position, Ordering::SeqCst);
        if session.frame_count % PROGRESS_INTERVAL == 0 {
            self.events.emit(RecorderEvent::Progress {
                bytes_written: position,
                elapsed_secs: session.started.elapsed().as_secs_f64(),
            });
        }

        if session.max_bytes > 0 && position >= session.max_bytes {
            log::info!(
                "[Recorder] Size limit of {} bytes reached after {} frames",
                session.max_bytes,
                session.frame_count
            );
            if let Some(session) = slot.take() {
                self.finish(session, StopReason::SizeLimit)?;
            }
        }
        Ok(())
    }

    /// Close out a session taken from the slot. The caller still holds the lock.
    fn finish(&self, mut session: Session, reason: StopReason) -> Result<RecordingSummary, RecorderError> {
        self.recording.store(false, Ordering::SeqCst);

        let (reason, failure) = match session.finalize() {
            Ok(()) => (reason, None),
            Err(e) => {
                log::error!("[Recorder] Finalize of {} failed: {}", session.path.display(), e);
                (StopReason::WriteFailed, Some(e))
            }
        };
        self.bytes_written.store(session.position, Ordering::SeqCst);

        let summary = session.summary(reason);
        log::info!(
            "[Recorder] Stopped ({}): {} frames, {} bytes, {:.1}s -> {}",
            reason,
            summary.frame_count,
            summary.bytes_written,
            summary.duration_secs,
            summary.path.display()
        );
        self.events.emit(RecorderEvent::Stopped {
            reason,
            summary: summary.clone(),
        });

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(summary),
        }
    }
}

impl Default for VideoRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("[Recorder] Stop on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names() {
        assert_eq!(RecordingFormat::parse("AVI"), Some(RecordingFormat::AviMjpeg));
        assert_eq!(RecordingFormat::parse("raw"), Some(RecordingFormat::Raw));
        assert_eq!(RecordingFormat::parse("mp4"), None);
        assert_eq!(RecordingFormat::AviMjpeg.to_string(), "avi_mjpeg");
        assert_eq!(StopReason::SizeLimit.to_string(), "size limit reached");
    }

    #[test]
    fn output_path_is_timestamped() {
        let config = RecordingConfig {
            output_dir: PathBuf::from("/tmp/out"),
            format: RecordingFormat::Raw,
            ..Default::default()
        };
        let path = config.next_output_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("recording_"));
        assert!(name.ends_with(".raw"));
        assert_eq!(path.parent(), Some(Path::new("/tmp/out")));
    }

    #[test]
    fn partial_frame_is_trimmed_before_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.avi");
        let recorder = VideoRecorder::new();
        recorder
            .start(&path, RecordingFormat::AviMjpeg, 4, 4, 30.0, 0)
            .unwrap();
        recorder.write_encoded_frame(&[0xAA; 30]).unwrap();
        recorder.write_encoded_frame(&[0xBB; 31]).unwrap();

        let mut session = recorder.session.lock().take().unwrap();
        let good_end = session.position;

        // Half a chunk reaches the file, more garbage stays buffered
        session.writer.write_all(b"00dc\xff\xff\x00\x00").unwrap();
        session.writer.write_all(&[0xCC; 9000]).unwrap();
        session.writer.write_all(&[0xDD; 5]).unwrap();
        assert_eq!(session.position, good_end);

        session.discard_partial().unwrap();
        session.finalize().unwrap();
        drop(session);

        let probe = probe_avi(&path).unwrap();
        assert_eq!(probe.frame_count, 2);
        assert_eq!(probe.index[1].size, 31);
        let index_len = (8 + 2 * avi::INDEX_ENTRY_LEN) as u64;
        assert_eq!(probe.file_len, good_end + index_len);
    }

    #[test]
    fn buffered_frames_survive_trimming() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffered.raw");
        let recorder = VideoRecorder::new();
        recorder
            .start(&path, RecordingFormat::Raw, 2, 2, 30.0, 0)
            .unwrap();
        recorder.write_raw_frame(&[1; 12]).unwrap();

        let mut session = recorder.session.lock().take().unwrap();
        // First frame is only in the buffer; the garbage follows it
        session.writer.write_all(&[9; 7]).unwrap();
        session.discard_partial().unwrap();
        session.finalize().unwrap();
        drop(session);

        let probe = probe_raw(&path).unwrap();
        assert_eq!(probe.header.frame_count, 1);
        assert_eq!(probe.payload_bytes, 12);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[probe.header.header_len..], &[1; 12]);
    }

    #[test]
    fn writes_without_session_are_rejected() {
        let recorder = VideoRecorder::new();
        assert!(matches!(
            recorder.write_encoded_frame(&[1, 2, 3]),
            Err(RecorderError::NotRecording)
        ));
        assert!(recorder.stop().unwrap().is_none());
        assert!(!recorder.is_recording());
    }
}
