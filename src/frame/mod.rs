// Captured frame buffers and their release obligations
//
// A capture source hands every processor a `FrameBuffer` together with a
// `ReleaseToken`. The buffer describes camera-owned memory; the token is the
// single-use capability that gives that memory back to the source.

pub mod release;
pub mod retained;

pub use release::ReleaseToken;
pub use retained::RetainedFrame;

use std::fmt;
use std::sync::Arc;

/// Pixel format code (V4L2-style fourcc, little-endian packed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    /// Packed YUV 4:2:2, Y0 U Y1 V
    pub const YUYV: PixelFormat = PixelFormat::from_fourcc(*b"YUYV");
    /// Packed YUV 4:2:2, U Y0 V Y1
    pub const UYVY: PixelFormat = PixelFormat::from_fourcc(*b"UYVY");
    /// 24-bit RGB
    pub const RGB24: PixelFormat = PixelFormat::from_fourcc(*b"RGB3");
    /// 24-bit BGR
    pub const BGR24: PixelFormat = PixelFormat::from_fourcc(*b"BGR3");
    /// 8-bit greyscale
    pub const GREY: PixelFormat = PixelFormat::from_fourcc(*b"GREY");
    /// Motion JPEG - each buffer is a complete JPEG image
    pub const MJPEG: PixelFormat = PixelFormat::from_fourcc(*b"MJPG");

    pub const fn from_fourcc(cc: [u8; 4]) -> Self {
        PixelFormat(u32::from_le_bytes(cc))
    }

    pub fn fourcc(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Parse a fourcc string such as "YUYV" (case-insensitive, aliases RGB/BGR)
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "RGB" | "RGB24" => return Some(Self::RGB24),
            "BGR" | "BGR24" => return Some(Self::BGR24),
            "GRAY" => return Some(Self::GREY),
            "MJPEG" | "JPEG" => return Some(Self::MJPEG),
            _ => {}
        }
        let bytes = upper.as_bytes();
        if bytes.len() != 4 {
            return None;
        }
        Some(Self::from_fourcc([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Bytes per pixel for packed uncompressed formats; None for compressed
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match *self {
            Self::YUYV | Self::UYVY => Some(2),
            Self::RGB24 | Self::BGR24 => Some(3),
            Self::GREY => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cc = self.fourcc();
        if cc.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            write!(f, "{}", String::from_utf8_lossy(&cc))
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

/// Descriptor for one captured frame.
///
/// Cloning is cheap and does not duplicate the release obligation, which
/// travels separately as a [`ReleaseToken`].
#[derive(Clone)]
pub struct FrameBuffer {
    /// Pixel data as delivered by the source
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Stride in bytes (0 = tightly packed)
    pub bytes_per_line: u32,
    /// Number of valid bytes in `data` (compressed formats are shorter than the buffer)
    pub payload_size: u32,
    /// Source-assigned, monotonically increasing, not necessarily contiguous
    pub frame_id: u64,
}

impl FrameBuffer {
    /// Byte length of the underlying buffer
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// The valid payload bytes
    pub fn payload(&self) -> &[u8] {
        let len = (self.payload_size as usize).min(self.data.len());
        if len == 0 {
            &self.data
        } else {
            &self.data[..len]
        }
    }

    /// Stride in bytes, falling back to the packed stride when unset
    pub fn stride(&self) -> usize {
        if self.bytes_per_line > 0 {
            return self.bytes_per_line as usize;
        }
        self.pixel_format
            .bytes_per_pixel()
            .map(|bpp| bpp * self.width as usize)
            .unwrap_or(0)
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("frame_id", &self.frame_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format.to_string())
            .field("length", &self.data.len())
            .field("payload_size", &self.payload_size)
            .finish()
    }
}

/// A processor registered with a capture source.
///
/// It must release `release` exactly once, either before returning or later
/// from whichever thread ends up holding the token.
pub trait FrameProcessor: Send + Sync {
    fn process(&self, frame: FrameBuffer, release: ReleaseToken);
}

impl<F> FrameProcessor for F
where
    F: Fn(FrameBuffer, ReleaseToken) + Send + Sync,
{
    fn process(&self, frame: FrameBuffer, release: ReleaseToken) {
        self(frame, release)
    }
}
