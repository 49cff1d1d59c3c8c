// Loopback listener: accepts viewers and hands them to the dispatcher

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use tungstenite::WebSocket;

use super::dispatch::{DispatchCommand, ViewerSocket};
use super::StreamError;

/// How long a client gets to complete the upgrade request
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) struct Listener {
    port: u16,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind `address:port` (port 0 picks an ephemeral port) and start accepting
    pub(crate) fn start(
        address: &str,
        port: u16,
        dispatch: Sender<DispatchCommand>,
        poll_interval: Duration,
    ) -> Result<Self, StreamError> {
        let bind_err = |source| StreamError::Bind {
            address: format!("{}:{}", address, port),
            source,
        };
        let listener = TcpListener::bind((address, port)).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let port = listener.local_addr().map_err(bind_err)?.port();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_flag.clone();
        let thread = std::thread::Builder::new()
            .name("framecast-stream-listen".into())
            .spawn(move || accept_loop(listener, dispatch, thread_stop, poll_interval))
            .map_err(StreamError::Spawn)?;

        log::info!("[Stream] Listening on ws://{}:{}/", address, port);
        Ok(Self {
            port,
            stop_flag,
            thread: Some(thread),
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[Stream] Listener thread panicked");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    dispatch: Sender<DispatchCommand>,
    stop_flag: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    // Accept polling does not need the dispatcher's ack latency
    let idle = poll_interval.max(Duration::from_millis(10));

    while !stop_flag.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => match handshake(stream) {
                Ok(socket) => {
                    if dispatch
                        .send(DispatchCommand::Viewer(ViewerSocket { socket, peer }))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => log::warn!("[Stream] Handshake with {} failed: {}", peer, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => std::thread::sleep(idle),
            Err(e) => {
                log::warn!("[Stream] Accept failed: {}", e);
                std::thread::sleep(idle);
            }
        }
    }
    log::debug!("[Stream] Listener stopped");
}

/// Upgrade a freshly accepted connection, then switch it to non-blocking for the dispatcher
fn handshake(stream: TcpStream) -> Result<WebSocket<TcpStream>, StreamError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.set_nodelay(true)?;

    let socket = tungstenite::accept(stream).map_err(|e| StreamError::Handshake(e.to_string()))?;
    socket.get_ref().set_read_timeout(None)?;
    socket.get_ref().set_nonblocking(true)?;
    Ok(socket)
}
