// Raw frame stream: text header followed by concatenated frame payloads
//
//   V4L2RAW
//   width=<n>
//   height=<n>
//   bytesPerFrame=<n>
//   frameCount=<n>
//   END
//
// The numeric fields that change at stop are zero-padded to a fixed width,
// so the rewritten header is exactly as long as the provisional one and never
// overlaps frame data.

use super::RecorderError;

pub const MAGIC: &str = "V4L2RAW";
const END_MARKER: &[u8] = b"END\n";

/// Parsed raw-stream header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub width: u32,
    pub height: u32,
    /// Total bytes written (header included) divided by frame count
    pub bytes_per_frame: u64,
    pub frame_count: u32,
    /// Length of the text header; frame data starts here
    pub header_len: usize,
}

pub fn header_bytes(width: u32, height: u32, bytes_per_frame: u64, frame_count: u32) -> Vec<u8> {
    format!(
        "{}\nwidth={}\nheight={}\nbytesPerFrame={:020}\nframeCount={:010}\nEND\n",
        MAGIC, width, height, bytes_per_frame, frame_count
    )
    .into_bytes()
}

/// Average bytes per frame as stored in the header.
///
/// `total_bytes` includes the header itself, so the value overstates the
/// payload size slightly for short recordings.
pub fn bytes_per_frame(total_bytes: u64, frame_count: u32) -> u64 {
    if frame_count == 0 {
        0
    } else {
        total_bytes / frame_count as u64
    }
}

pub fn parse_header(data: &[u8]) -> Result<RawHeader, RecorderError> {
    let malformed = |msg: &str| RecorderError::Malformed(msg.to_string());

    let end = data
        .windows(END_MARKER.len())
        .position(|w| w == END_MARKER)
        .ok_or_else(|| malformed("missing END line"))?;
    let text = std::str::from_utf8(&data[..end]).map_err(|_| malformed("header is not UTF-8"))?;

    let mut lines = text.lines();
    if lines.next() != Some(MAGIC) {
        return Err(malformed("missing V4L2RAW magic"));
    }

    let (mut width, mut height, mut bpf, mut count) = (None, None, None, None);
    for line in lines {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| RecorderError::Malformed(format!("bad header line: {:?}", line)))?;
        let parsed: u64 = value
            .trim()
            .parse()
            .map_err(|_| RecorderError::Malformed(format!("bad value for {}: {:?}", key, value)))?;
        match key {
            "width" => width = Some(parsed),
            "height" => height = Some(parsed),
            "bytesPerFrame" => bpf = Some(parsed),
            "frameCount" => count = Some(parsed),
            _ => log::debug!("[Recorder] Unknown raw header key {}", key),
        }
    }

    let narrow = |v: Option<u64>, name: &str| -> Result<u32, RecorderError> {
        let v = v.ok_or_else(|| RecorderError::Malformed(format!("missing {}", name)))?;
        u32::try_from(v).map_err(|_| RecorderError::Malformed(format!("{} out of range", name)))
    };

    Ok(RawHeader {
        width: narrow(width, "width")?,
        height: narrow(height, "height")?,
        bytes_per_frame: bpf.ok_or_else(|| malformed("missing bytesPerFrame"))?,
        frame_count: narrow(count, "frameCount")?,
        header_len: end + END_MARKER.len(),
    })
}
