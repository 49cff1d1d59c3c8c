// Framecast - camera frame distribution
// Main library entry point
//
// Frames from a capture source are fanned out to a low-latency live preview
// (JPEG over WebSocket with viewer-paced backpressure) and to a recorder that
// writes AVI MJPEG or raw frame streams.

pub mod capture;
pub mod config;
pub mod convert;
pub mod events;
pub mod frame;
pub mod info;
pub mod pipeline;
pub mod recording;
pub mod snapshot;
pub mod stream;

pub use config::Config;
pub use frame::{FrameBuffer, FrameProcessor, PixelFormat, ReleaseToken};
pub use pipeline::CapturePipeline;
pub use recording::{RecordingFormat, StopReason, VideoRecorder};
pub use stream::StreamEngine;
