// Live stream engine
//
// Capture callbacks push frames into a single-slot mailbox and return at
// once. A worker thread converts the newest frame to JPEG only when a viewer
// has acked the previous one, and a dispatcher thread owns all viewer
// sockets. Frames that arrive while the pipeline is busy replace each other
// in the mailbox and are released without being converted.

mod dispatch;
pub mod message;
mod server;
mod state;
pub mod viewer;
mod worker;

pub use message::{encode_frame_message, FrameMessage, ACK_TOKEN, HEADER_LEN};
pub use viewer::ViewerClient;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::convert::{FrameConverter, PixelConverter};
use crate::events::EventBus;
use crate::frame::{FrameBuffer, FrameProcessor, ReleaseToken};
use dispatch::{DispatchCommand, Dispatcher};
use server::Listener;
use state::StreamShared;
use worker::WorkerContext;

/// Error type for the stream engine
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn thread: {0}")]
    Spawn(std::io::Error),

    #[error("Stream engine already running")]
    AlreadyRunning,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Malformed frame message: {0}")]
    Malformed(String),

    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Stream engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Interface to listen on; viewers are expected on the same machine
    pub bind_address: String,
    /// 0 picks an ephemeral port
    pub port: u16,
    /// JPEG quality (1-100) of streamed frames
    pub jpeg_quality: u8,
    /// How often the dispatcher polls viewers for acks
    pub poll_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            jpeg_quality: 80,
            poll_interval_ms: 5,
        }
    }
}

/// Notifications from the stream engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A frame was converted and offered to the dispatcher
    FrameConverted {
        frame_id: u64,
        width: u32,
        height: u32,
        jpeg_bytes: usize,
    },
    ViewerConnected { peer: SocketAddr },
    ViewerDisconnected { peer: SocketAddr },
}

/// Threads and channels that exist between `start` and `stop`
struct Running {
    dispatch_tx: Sender<DispatchCommand>,
    dispatcher: Option<JoinHandle<()>>,
    listener: Listener,
    worker: Option<JoinHandle<()>>,
}

impl Running {
    fn shutdown_transport(&mut self) {
        self.listener.stop();
        let _ = self.dispatch_tx.send(DispatchCommand::Shutdown);
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                log::error!("[Stream] Dispatcher thread panicked");
            }
        }
    }
}

pub struct StreamEngine {
    config: StreamConfig,
    converter: Arc<dyn FrameConverter>,
    shared: Arc<StreamShared>,
    events: Arc<EventBus<StreamEvent>>,
    running: Mutex<Option<Running>>,
}

impl StreamEngine {
    pub fn new(config: StreamConfig) -> Self {
        Self::with_converter(config, Arc::new(PixelConverter))
    }

    pub fn with_converter(config: StreamConfig, converter: Arc<dyn FrameConverter>) -> Self {
        Self {
            config,
            converter,
            shared: Arc::new(StreamShared::new()),
            events: Arc::new(EventBus::new()),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Bound listening port, if started
    pub fn port(&self) -> Option<u16> {
        self.running.lock().as_ref().map(|running| running.listener.port())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Bind the listener and start the dispatcher and worker threads.
    ///
    /// On failure nothing is left running and `port()` stays `None`.
    pub fn start(&self) -> Result<u16, StreamError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(StreamError::AlreadyRunning);
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let (dispatch_tx, dispatch_rx) = unbounded();
        let listener = Listener::start(
            &self.config.bind_address,
            self.config.port,
            dispatch_tx.clone(),
            poll_interval,
        )?;
        let port = listener.port();

        self.shared.reset_for_worker();
        let dispatcher = Dispatcher::new(
            dispatch_rx,
            self.shared.clone(),
            self.events.clone(),
            poll_interval,
        )
        .spawn()
        .map_err(StreamError::Spawn);

        let mut state = Running {
            dispatch_tx,
            dispatcher: None,
            listener,
            worker: None,
        };
        match dispatcher {
            Ok(handle) => state.dispatcher = Some(handle),
            Err(e) => {
                state.shutdown_transport();
                return Err(e);
            }
        }
        match self.spawn_worker(state.dispatch_tx.clone()) {
            Ok(handle) => state.worker = Some(handle),
            Err(e) => {
                state.shutdown_transport();
                return Err(e);
            }
        }

        *running = Some(state);
        log::info!("[Stream] Engine started on port {}", port);
        Ok(port)
    }

    /// Stop all threads and release any retained frame. Safe to call repeatedly.
    pub fn stop(&self) {
        let state = self.running.lock().take();
        match state {
            Some(mut state) => {
                self.stop_worker(state.worker.take());
                state.shutdown_transport();
                log::info!("[Stream] Engine stopped");
            }
            None => self.shared.release_pending(),
        }
    }

    /// Drop whatever is queued and restart conversion with fresh state.
    ///
    /// Viewers stay connected. Used when the capture format changes so no
    /// stale frame of the old geometry is ever sent.
    pub fn flush(&self) -> Result<(), StreamError> {
        let mut running = self.running.lock();
        let Some(state) = running.as_mut() else {
            self.shared.release_pending();
            return Ok(());
        };

        self.stop_worker(state.worker.take());
        self.shared.reset_for_worker();
        state.worker = Some(self.spawn_worker(state.dispatch_tx.clone())?);
        log::debug!("[Stream] Flushed");
        Ok(())
    }

    /// Hand a frame to the engine. Never blocks on conversion or the network.
    pub fn push(&self, frame: FrameBuffer, release: ReleaseToken) {
        self.shared.push(frame, release);
    }

    fn spawn_worker(&self, dispatch: Sender<DispatchCommand>) -> Result<JoinHandle<()>, StreamError> {
        worker::spawn(WorkerContext {
            shared: self.shared.clone(),
            converter: self.converter.clone(),
            jpeg_quality: self.config.jpeg_quality,
            dispatch,
            events: self.events.clone(),
        })
        .map_err(StreamError::Spawn)
    }

    fn stop_worker(&self, worker: Option<JoinHandle<()>>) {
        self.shared.stop_worker.store(true, Ordering::SeqCst);
        self.shared.notify_worker();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("[Stream] Worker thread panicked");
            }
        }
        self.shared.release_pending();
    }
}

impl FrameProcessor for StreamEngine {
    fn process(&self, frame: FrameBuffer, release: ReleaseToken) {
        self.push(frame, release);
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::sync::atomic::AtomicUsize;

    fn frame(id: u64) -> FrameBuffer {
        FrameBuffer {
            data: Arc::from(vec![0u8; 4 * 2 * 2]),
            width: 4,
            height: 2,
            pixel_format: PixelFormat::YUYV,
            bytes_per_line: 8,
            payload_size: 16,
            frame_id: id,
        }
    }

    fn counting(id: u64, released: &Arc<AtomicUsize>) -> ReleaseToken {
        let counter = released.clone();
        ReleaseToken::new(id, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn unstarted_engine_keeps_only_latest() {
        let engine = StreamEngine::new(StreamConfig::default());
        let released = Arc::new(AtomicUsize::new(0));
        for id in 1..=6 {
            engine.push(frame(id), counting(id, &released));
        }
        assert_eq!(released.load(Ordering::SeqCst), 5);
        assert_eq!(
            engine.shared.mailbox.lock().frame().map(|f| f.frame_id),
            Some(6)
        );

        engine.stop();
        assert_eq!(released.load(Ordering::SeqCst), 6);
        engine.stop();
    }

    #[test]
    fn flush_without_start_releases() {
        let engine = StreamEngine::new(StreamConfig::default());
        let released = Arc::new(AtomicUsize::new(0));
        engine.push(frame(1), counting(1, &released));
        engine.flush().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(engine.port(), None);
    }

    #[test]
    fn bind_failure_leaves_engine_inert() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let engine = StreamEngine::new(StreamConfig {
            port: occupied.local_addr().unwrap().port(),
            ..Default::default()
        });
        assert!(matches!(engine.start(), Err(StreamError::Bind { .. })));
        assert_eq!(engine.port(), None);
        assert!(!engine.is_running());
        engine.stop();
    }

    #[test]
    fn start_twice_is_rejected() {
        let engine = StreamEngine::new(StreamConfig::default());
        let port = engine.start().unwrap();
        assert!(port > 0);
        assert_eq!(engine.port(), Some(port));
        assert!(matches!(engine.start(), Err(StreamError::AlreadyRunning)));
        engine.stop();
        assert_eq!(engine.port(), None);
    }
}
