// Dispatcher thread: owns every viewer socket
//
// All socket I/O happens here. Broadcasts, new viewers and shutdown arrive as
// commands; between commands the dispatcher polls viewers for acks. Sockets
// are non-blocking, so a slow viewer never stalls the others: a frame that
// cannot be fully written stays buffered in that viewer's socket and the
// viewer is skipped for later frames until the buffer drains.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tungstenite::{Message, WebSocket};

use super::message::is_ack;
use super::state::StreamShared;
use super::StreamEvent;
use crate::events::EventBus;

pub(crate) enum DispatchCommand {
    /// An encoded frame message ready for delivery, tagged with the worker generation
    Broadcast { generation: u64, message: Vec<u8> },
    /// A viewer that completed its handshake
    Viewer(ViewerSocket),
    Shutdown,
}

pub(crate) struct ViewerSocket {
    pub(crate) socket: WebSocket<TcpStream>,
    pub(crate) peer: SocketAddr,
}

struct Viewer {
    socket: WebSocket<TcpStream>,
    peer: SocketAddr,
    /// Part of an earlier frame is still waiting in the write buffer
    backlogged: bool,
}

enum Health {
    Alive,
    Gone,
}

pub(crate) struct Dispatcher {
    commands: Receiver<DispatchCommand>,
    shared: Arc<StreamShared>,
    events: Arc<EventBus<StreamEvent>>,
    poll_interval: Duration,
    viewers: Vec<Viewer>,
}

impl Dispatcher {
    pub(crate) fn new(
        commands: Receiver<DispatchCommand>,
        shared: Arc<StreamShared>,
        events: Arc<EventBus<StreamEvent>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            commands,
            shared,
            events,
            poll_interval,
            viewers: Vec::new(),
        }
    }

    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("framecast-stream-dispatch".into())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        log::debug!("[Stream] Dispatcher started");
        loop {
            match self.commands.recv_timeout(self.poll_interval) {
                Ok(DispatchCommand::Broadcast { generation, message }) => {
                    self.broadcast(generation, message)
                }
                Ok(DispatchCommand::Viewer(viewer)) => self.add_viewer(viewer),
                Ok(DispatchCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.service_viewers();
        }
        self.close_all();
        log::debug!("[Stream] Dispatcher stopped");
    }

    fn add_viewer(&mut self, viewer: ViewerSocket) {
        log::info!("[Stream] Viewer connected: {}", viewer.peer);
        self.events.emit(StreamEvent::ViewerConnected { peer: viewer.peer });
        self.viewers.push(Viewer {
            socket: viewer.socket,
            peer: viewer.peer,
            backlogged: false,
        });
        self.shared.mark_viewer_ready();
    }

    fn broadcast(&mut self, generation: u64, message: Vec<u8>) {
        if !self.shared.begin_delivery(generation) {
            log::trace!("[Stream] No ready viewer or stale frame, dropped");
            return;
        }

        let message = Message::Binary(message);
        let events = &self.events;
        self.viewers.retain_mut(|viewer| {
            if viewer.backlogged {
                match flush(viewer) {
                    Health::Alive if viewer.backlogged => {
                        log::trace!("[Stream] Viewer {} still backlogged, frame skipped", viewer.peer);
                        return true;
                    }
                    Health::Alive => {}
                    Health::Gone => return disconnected(events, viewer),
                }
            }
            match viewer.socket.send(message.clone()) {
                Ok(()) => true,
                Err(e) if would_block(&e) => {
                    viewer.backlogged = true;
                    true
                }
                Err(e) => {
                    log::debug!("[Stream] Send to {} failed: {}", viewer.peer, e);
                    disconnected(events, viewer)
                }
            }
        });
    }

    /// Flush backlogged writes and read any pending acks
    fn service_viewers(&mut self) {
        let shared = &self.shared;
        let events = &self.events;
        self.viewers.retain_mut(|viewer| {
            if viewer.backlogged {
                if let Health::Gone = flush(viewer) {
                    return disconnected(events, viewer);
                }
            }
            loop {
                match viewer.socket.read() {
                    Ok(Message::Text(text)) => {
                        if is_ack(&text) {
                            shared.mark_viewer_ready();
                        } else {
                            log::trace!("[Stream] Ignoring text from {}: {:?}", viewer.peer, text);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ = viewer.socket.flush();
                        return disconnected(events, viewer);
                    }
                    Ok(_) => {}
                    Err(e) if would_block(&e) => return true,
                    Err(e) => {
                        log::debug!("[Stream] Read from {} failed: {}", viewer.peer, e);
                        return disconnected(events, viewer);
                    }
                }
            }
        });
    }

    fn close_all(&mut self) {
        for mut viewer in self.viewers.drain(..) {
            let _ = viewer.socket.close(None);
            let _ = viewer.socket.flush();
            log::debug!("[Stream] Closed viewer {}", viewer.peer);
        }
    }
}

fn flush(viewer: &mut Viewer) -> Health {
    match viewer.socket.flush() {
        Ok(()) => {
            viewer.backlogged = false;
            Health::Alive
        }
        Err(e) if would_block(&e) => Health::Alive,
        Err(e) => {
            log::debug!("[Stream] Flush to {} failed: {}", viewer.peer, e);
            Health::Gone
        }
    }
}

/// Logs and emits the disconnect; returns `false` so callers can hand it to `retain_mut`
fn disconnected(events: &EventBus<StreamEvent>, viewer: &Viewer) -> bool {
    log::info!("[Stream] Viewer disconnected: {}", viewer.peer);
    events.emit(StreamEvent::ViewerDisconnected { peer: viewer.peer });
    false
}

fn would_block(e: &tungstenite::Error) -> bool {
    matches!(e, tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::WouldBlock)
}
