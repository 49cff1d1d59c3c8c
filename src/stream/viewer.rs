// Minimal blocking viewer, used by the CLI's self-check and by tests

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tungstenite::{Message, WebSocket};

use super::message::{FrameMessage, ACK_TOKEN};
use super::StreamError;

/// A WebSocket viewer that speaks the ack protocol
pub struct ViewerClient {
    socket: WebSocket<TcpStream>,
}

impl ViewerClient {
    /// Connect to a stream engine on the loopback interface and announce readiness
    pub fn connect(port: u16) -> Result<Self, StreamError> {
        Self::connect_addr(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    pub fn connect_addr(addr: SocketAddr) -> Result<Self, StreamError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let (socket, _response) = tungstenite::client(format!("ws://{}/", addr), stream)
            .map_err(|e| StreamError::Handshake(e.to_string()))?;

        let mut client = Self { socket };
        client.ack()?;
        Ok(client)
    }

    /// Tell the server this viewer is ready for another frame
    pub fn ack(&mut self) -> Result<(), StreamError> {
        self.socket.send(Message::Text(ACK_TOKEN.to_string()))?;
        Ok(())
    }

    /// Wait up to `timeout` for the next frame; `Ok(None)` on timeout.
    ///
    /// Does not ack; call [`ViewerClient::ack`] once the frame is handled.
    pub fn next_frame(&mut self, timeout: Duration) -> Result<Option<FrameMessage>, StreamError> {
        self.socket.get_ref().set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        loop {
            match self.socket.read() {
                Ok(Message::Binary(bytes)) => return FrameMessage::decode(&bytes).map(Some),
                Ok(Message::Close(_)) => return Err(StreamError::Closed),
                Ok(_) => continue,
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
                {
                    return Ok(None)
                }
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return Err(StreamError::Closed)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Close the connection, waiting briefly for the server's reply
    pub fn close(mut self) {
        if self.socket.close(None).is_err() {
            return;
        }
        let _ = self.socket.get_ref().set_read_timeout(Some(Duration::from_millis(500)));
        while self.socket.read().is_ok() {}
    }
}
