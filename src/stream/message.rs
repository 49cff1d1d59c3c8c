// Live-stream wire format
//
// One binary message per frame:
//   [0..4)   width     u32 LE
//   [4..8)   height    u32 LE
//   [8..16)  frame id  u64 LE
//   [16..)   JPEG payload
//
// Viewers request the next frame with the text message "ack".

use super::StreamError;

/// Fixed header length preceding the JPEG payload
pub const HEADER_LEN: usize = 16;

/// Text token a viewer sends when it is ready for another frame
pub const ACK_TOKEN: &str = "ack";

/// A decoded frame message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMessage {
    pub width: u32,
    pub height: u32,
    pub frame_id: u64,
    pub jpeg: Vec<u8>,
}

/// Assemble the binary message for one frame
pub fn encode_frame_message(width: u32, height: u32, frame_id: u64, jpeg: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_LEN + jpeg.len());
    message.extend_from_slice(&width.to_le_bytes());
    message.extend_from_slice(&height.to_le_bytes());
    message.extend_from_slice(&frame_id.to_le_bytes());
    message.extend_from_slice(jpeg);
    message
}

impl FrameMessage {
    pub fn encode(&self) -> Vec<u8> {
        encode_frame_message(self.width, self.height, self.frame_id, &self.jpeg)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StreamError> {
        if bytes.len() < HEADER_LEN {
            return Err(StreamError::Malformed(format!(
                "frame message is {} bytes, header needs {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        let width = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let height = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[8..16]);

        Ok(Self {
            width,
            height,
            frame_id: u64::from_le_bytes(id),
            jpeg: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

/// Whether a viewer text message is a readiness acknowledgment
pub fn is_ack(text: &str) -> bool {
    text == ACK_TOKEN
}
