// AVI 1.0 (RIFF) layout for single-stream MJPEG files
//
// RIFF('AVI '
//   LIST('hdrl' avih LIST('strl' strh strf))
//   LIST('movi' 00dc ...)
//   idx1
// )
//
// The header has a fixed size, so every field that is only known at the end
// of a session sits at a fixed offset and is patched in place on finalize.

use std::io::{self, Seek, SeekFrom, Write};

/// Offset of the first byte after the 'movi' tag
pub const MOVI_DATA_START: u64 = 224;
/// Total length of the provisional header
pub const HEADER_LEN: usize = MOVI_DATA_START as usize;
/// Chunk tag for compressed video of stream 0
pub const VIDEO_CHUNK: [u8; 4] = *b"00dc";
/// Bytes per idx1 record
pub const INDEX_ENTRY_LEN: usize = 16;

const AVIF_HASINDEX: u32 = 0x10;
pub const AVIIF_KEYFRAME: u32 = 0x10;

// Fields patched on finalize
pub const RIFF_SIZE_OFFSET: u64 = 4;
pub const AVIH_TOTAL_FRAMES_OFFSET: u64 = 48;
pub const STRH_LENGTH_OFFSET: u64 = 140;
pub const MOVI_SIZE_OFFSET: u64 = 216;

const HDRL_SIZE: u32 = 4 + (8 + 56) + (8 + STRL_SIZE);
const STRL_SIZE: u32 = 4 + (8 + 56) + (8 + 40);

/// One idx1 record; `offset` is relative to [`MOVI_DATA_START`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u32,
    pub size: u32,
}

struct HeaderWriter {
    buf: Vec<u8>,
}

impl HeaderWriter {
    fn fourcc(&mut self, cc: &[u8; 4]) -> &mut Self {
        self.buf.extend_from_slice(cc);
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }
}

/// Build the header with zeroed placeholders for sizes and frame counts
pub fn provisional_header(width: u32, height: u32, fps: f64) -> Vec<u8> {
    let fps = if fps > 0.0 { fps } else { 30.0 };
    let us_per_frame = (1_000_000.0 / fps) as u32;
    let rate = (fps as u32).max(1);

    let mut w = HeaderWriter {
        buf: Vec::with_capacity(HEADER_LEN),
    };
    w.fourcc(b"RIFF").u32(0).fourcc(b"AVI ");
    w.fourcc(b"LIST").u32(HDRL_SIZE).fourcc(b"hdrl");

    // avih
    w.fourcc(b"avih").u32(56);
    w.u32(us_per_frame) // dwMicroSecPerFrame
        .u32(0) // dwMaxBytesPerSec
        .u32(0) // dwPaddingGranularity
        .u32(AVIF_HASINDEX)
        .u32(0) // dwTotalFrames
        .u32(0) // dwInitialFrames
        .u32(1) // dwStreams
        .u32(0) // dwSuggestedBufferSize
        .u32(width)
        .u32(height)
        .u32(0)
        .u32(0)
        .u32(0)
        .u32(0);

    w.fourcc(b"LIST").u32(STRL_SIZE).fourcc(b"strl");

    // strh
    w.fourcc(b"strh").u32(56);
    w.fourcc(b"vids")
        .fourcc(b"MJPG")
        .u32(0) // dwFlags
        .u16(0) // wPriority
        .u16(0) // wLanguage
        .u32(0) // dwInitialFrames
        .u32(1) // dwScale
        .u32(rate) // dwRate
        .u32(0) // dwStart
        .u32(0) // dwLength
        .u32(0) // dwSuggestedBufferSize
        .u32(u32::MAX) // dwQuality (-1 = default)
        .u32(0) // dwSampleSize
        .u16(0)
        .u16(0)
        .u16(width.min(u16::MAX as u32) as u16)
        .u16(height.min(u16::MAX as u32) as u16);

    // strf: BITMAPINFOHEADER
    w.fourcc(b"strf").u32(40);
    w.u32(40)
        .u32(width)
        .u32(height)
        .u16(1) // biPlanes
        .u16(24) // biBitCount
        .fourcc(b"MJPG")
        .u32(width.saturating_mul(height).saturating_mul(3))
        .u32(0)
        .u32(0)
        .u32(0)
        .u32(0);

    w.fourcc(b"LIST").u32(0).fourcc(b"movi");

    debug_assert_eq!(w.buf.len(), HEADER_LEN);
    w.buf
}

/// Write one chunk (tag, LE size, payload, pad to even). Returns bytes written.
pub fn write_chunk<W: Write>(out: &mut W, tag: &[u8; 4], payload: &[u8]) -> io::Result<u64> {
    let size = clamp_u32(payload.len() as u64);
    out.write_all(tag)?;
    out.write_all(&size.to_le_bytes())?;
    out.write_all(payload)?;
    let mut written = 8 + payload.len() as u64;
    if payload.len() % 2 == 1 {
        out.write_all(&[0])?;
        written += 1;
    }
    Ok(written)
}

/// Serialize the idx1 chunk for `entries`
pub fn index_chunk(entries: &[IndexEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + entries.len() * INDEX_ENTRY_LEN);
    buf.extend_from_slice(b"idx1");
    buf.extend_from_slice(&clamp_u32((entries.len() * INDEX_ENTRY_LEN) as u64).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&VIDEO_CHUNK);
        buf.extend_from_slice(&AVIIF_KEYFRAME.to_le_bytes());
        buf.extend_from_slice(&entry.offset.to_le_bytes());
        buf.extend_from_slice(&entry.size.to_le_bytes());
    }
    buf
}

/// Header fields to patch once the file is complete.
///
/// `idx1_pos` is the file offset where the index chunk starts and
/// `file_len` the final file length.
pub fn finalize_patches(file_len: u64, idx1_pos: u64, frame_count: u32) -> [(u64, u32); 4] {
    let movi_size = idx1_pos.saturating_sub(MOVI_DATA_START) + 4;
    [
        (RIFF_SIZE_OFFSET, clamp_u32(file_len.saturating_sub(8))),
        (AVIH_TOTAL_FRAMES_OFFSET, frame_count),
        (STRH_LENGTH_OFFSET, frame_count),
        (MOVI_SIZE_OFFSET, clamp_u32(movi_size)),
    ]
}

/// Seek-and-write each patch, leaving the cursor at `restore`
pub fn apply_patches<W: Write + Seek>(
    out: &mut W,
    patches: &[(u64, u32)],
    restore: u64,
) -> io::Result<()> {
    for &(offset, value) in patches {
        out.seek(SeekFrom::Start(offset))?;
        out.write_all(&value.to_le_bytes())?;
    }
    out.seek(SeekFrom::Start(restore))?;
    Ok(())
}

fn clamp_u32(v: u64) -> u32 {
    if v > u32::MAX as u64 {
        log::warn!("[Recorder] Value {} exceeds AVI 1.0 field range, clamped", v);
        u32::MAX
    } else {
        v as u32
    }
}
