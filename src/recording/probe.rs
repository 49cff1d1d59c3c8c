// Structural checks for finished recordings
//
// Walks RIFF chunks directly rather than trusting any header field, and
// cross-checks every size and count the recorder patches on finalize.

use std::path::Path;

use super::avi::{IndexEntry, INDEX_ENTRY_LEN, VIDEO_CHUNK};
use super::raw::{self, RawHeader};
use super::RecorderError;

#[derive(Debug, Clone)]
pub struct AviProbe {
    pub width: u32,
    pub height: u32,
    pub micros_per_frame: u32,
    /// Frame count from the main header; equal to the stream length and the index length
    pub frame_count: u32,
    pub index: Vec<IndexEntry>,
    pub file_len: u64,
}

impl AviProbe {
    pub fn duration_secs(&self) -> f64 {
        self.frame_count as f64 * self.micros_per_frame as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone)]
pub struct RawProbe {
    pub header: RawHeader,
    pub payload_bytes: u64,
    pub file_len: u64,
}

struct Chunk {
    id: [u8; 4],
    /// Offset of the chunk header
    offset: usize,
    size: u32,
}

impl Chunk {
    fn data_start(&self) -> usize {
        self.offset + 8
    }

    fn list_type<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        data.get(self.data_start()..self.data_start() + 4)
    }
}

fn malformed(msg: impl Into<String>) -> RecorderError {
    RecorderError::Malformed(msg.into())
}

fn le32(data: &[u8], at: usize) -> Result<u32, RecorderError> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| malformed(format!("truncated at offset {}", at)))
}

/// Chunks between `start` and `end`, word-aligned
fn walk(data: &[u8], start: usize, end: usize) -> Result<Vec<Chunk>, RecorderError> {
    let mut chunks = Vec::new();
    let mut offset = start;
    while offset + 8 <= end {
        let mut id = [0u8; 4];
        id.copy_from_slice(&data[offset..offset + 4]);
        let size = le32(data, offset + 4)?;
        let chunk_end = offset + 8 + size as usize;
        if chunk_end > end {
            return Err(malformed(format!(
                "chunk {} at {} overruns its parent",
                String::from_utf8_lossy(&id),
                offset
            )));
        }
        chunks.push(Chunk { id, offset, size });
        offset = chunk_end + (size as usize % 2);
    }
    Ok(chunks)
}

pub fn probe_avi(path: &Path) -> Result<AviProbe, RecorderError> {
    let data = std::fs::read(path)?;
    let file_len = data.len() as u64;
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"AVI " {
        return Err(malformed("missing RIFF AVI header"));
    }
    let riff_size = le32(&data, 4)? as u64;
    if riff_size != file_len - 8 {
        return Err(malformed(format!(
            "RIFF size {} does not match file length {}",
            riff_size, file_len
        )));
    }

    let top = walk(&data, 12, data.len())?;
    let list = |kind: &[u8; 4]| {
        top.iter()
            .find(|c| &c.id == b"LIST" && c.list_type(&data) == Some(&kind[..]))
    };

    // hdrl: avih + strl/strh
    let hdrl = list(b"hdrl").ok_or_else(|| malformed("no hdrl list"))?;
    let hdrl_end = hdrl.data_start() + hdrl.size as usize;
    let hdrl_chunks = walk(&data, hdrl.data_start() + 4, hdrl_end)?;
    let avih = hdrl_chunks
        .iter()
        .find(|c| &c.id == b"avih")
        .ok_or_else(|| malformed("no avih chunk"))?;
    let a = avih.data_start();
    let micros_per_frame = le32(&data, a)?;
    let frame_count = le32(&data, a + 16)?;
    let width = le32(&data, a + 32)?;
    let height = le32(&data, a + 36)?;

    let strl = hdrl_chunks
        .iter()
        .find(|c| &c.id == b"LIST" && c.list_type(&data) == Some(&b"strl"[..]))
        .ok_or_else(|| malformed("no strl list"))?;
    let strl_chunks = walk(&data, strl.data_start() + 4, strl.data_start() + strl.size as usize)?;
    let strh = strl_chunks
        .iter()
        .find(|c| &c.id == b"strh")
        .ok_or_else(|| malformed("no strh chunk"))?;
    if data.get(strh.data_start()..strh.data_start() + 8) != Some(&b"vidsMJPG"[..]) {
        return Err(malformed("stream is not MJPEG video"));
    }
    let stream_length = le32(&data, strh.data_start() + 32)?;
    if stream_length != frame_count {
        return Err(malformed(format!(
            "strh length {} != avih frames {}",
            stream_length, frame_count
        )));
    }

    // movi must end exactly where idx1 begins
    let movi = list(b"movi").ok_or_else(|| malformed("no movi list"))?;
    let movi_data = movi.data_start() + 4;
    let movi_end = movi.data_start() + movi.size as usize;
    let idx1 = top
        .iter()
        .find(|c| &c.id == b"idx1")
        .ok_or_else(|| malformed("no idx1 chunk"))?;
    if idx1.offset != movi_end {
        return Err(malformed(format!(
            "movi ends at {} but idx1 starts at {}",
            movi_end, idx1.offset
        )));
    }

    if idx1.size as usize % INDEX_ENTRY_LEN != 0 {
        return Err(malformed("idx1 size is not a multiple of 16"));
    }
    let entries = idx1.size as usize / INDEX_ENTRY_LEN;
    if entries != frame_count as usize {
        return Err(malformed(format!(
            "index has {} entries, header says {} frames",
            entries, frame_count
        )));
    }

    let mut index = Vec::with_capacity(entries);
    let mut previous: Option<u32> = None;
    for i in 0..entries {
        let base = idx1.data_start() + i * INDEX_ENTRY_LEN;
        if data[base..base + 4] != VIDEO_CHUNK {
            return Err(malformed(format!("index entry {} is not 00dc", i)));
        }
        let entry = IndexEntry {
            offset: le32(&data, base + 8)?,
            size: le32(&data, base + 12)?,
        };
        if previous.is_some_and(|p| entry.offset <= p) {
            return Err(malformed(format!("index offsets not increasing at entry {}", i)));
        }
        previous = Some(entry.offset);

        let chunk_at = movi_data + entry.offset as usize;
        if chunk_at + 8 + entry.size as usize > movi_end
            || data[chunk_at..chunk_at + 4] != VIDEO_CHUNK
            || le32(&data, chunk_at + 4)? != entry.size
        {
            return Err(malformed(format!(
                "index entry {} does not match the chunk at offset {}",
                i, chunk_at
            )));
        }
        index.push(entry);
    }

    Ok(AviProbe {
        width,
        height,
        micros_per_frame,
        frame_count,
        index,
        file_len,
    })
}

pub fn probe_raw(path: &Path) -> Result<RawProbe, RecorderError> {
    let data = std::fs::read(path)?;
    let header = raw::parse_header(&data)?;
    let file_len = data.len() as u64;
    let payload_bytes = file_len - header.header_len as u64;

    if (header.frame_count == 0) != (payload_bytes == 0) {
        return Err(malformed(format!(
            "{} frames but {} payload bytes",
            header.frame_count, payload_bytes
        )));
    }
    let expected = raw::bytes_per_frame(file_len, header.frame_count);
    if header.bytes_per_frame != expected {
        return Err(malformed(format!(
            "bytesPerFrame {} but file implies {}",
            header.bytes_per_frame, expected
        )));
    }

    Ok(RawProbe {
        header,
        payload_bytes,
        file_len,
    })
}
