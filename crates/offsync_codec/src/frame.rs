//! Record envelope encoding and streaming decode.

use crate::crc::compute_crc32;
use crate::error::{CodecError, CodecResult};
use bytes::{BufMut, BytesMut};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"OSYN";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Caller-defined record kind.
    pub kind: u8,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// A frame together with its position in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFrame {
    /// Offset of the first magic byte.
    pub offset: u64,
    /// Encoded length including header and checksum.
    pub encoded_len: u64,
    /// The frame itself.
    pub frame: Frame,
}

/// Wraps `payload` in a checksummed envelope.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLarge`] if the payload exceeds `u32::MAX` bytes.
pub fn encode_frame(kind: u8, payload: &[u8]) -> CodecResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CodecError::PayloadTooLarge { len: payload.len() })?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    buf.put_slice(&FRAME_MAGIC);
    buf.put_u16_le(FRAME_VERSION);
    buf.put_u8(kind);
    buf.put_u32_le(len);
    buf.put_slice(payload);
    let crc = compute_crc32(&buf);
    buf.put_u32_le(crc);

    Ok(buf.to_vec())
}

/// Streams frames out of a journal image.
///
/// - A frame cut short by the end of input (a torn write) ends iteration
///   quietly; [`FrameReader::is_torn`] then reports `true`
/// - A bad magic, unknown version or checksum mismatch yields
///   [`CodecError::Corrupt`] and ends iteration
#[derive(Debug)]
pub struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
    torn: bool,
    finished: bool,
}

impl<'a> FrameReader<'a> {
    /// Creates a reader over `data`, starting at offset 0.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            torn: false,
            finished: false,
        }
    }

    /// Offset just past the last intact frame.
    ///
    /// Truncating the journal here drops a torn tail.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.pos as u64
    }

    /// Whether iteration stopped on an incomplete trailing frame.
    #[must_use]
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    fn read_next(&mut self) -> CodecResult<Option<ReadFrame>> {
        let start = self.pos;
        let remaining = &self.data[start..];
        if remaining.is_empty() {
            return Ok(None);
        }
        if remaining.len() < HEADER_SIZE {
            self.torn = true;
            return Ok(None);
        }

        let offset = start as u64;
        if remaining[0..4] != FRAME_MAGIC {
            return Err(CodecError::corrupt(offset, "invalid magic"));
        }
        let version = u16::from_le_bytes([remaining[4], remaining[5]]);
        if version == 0 || version > FRAME_VERSION {
            return Err(CodecError::corrupt(
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let kind = remaining[6];
        let len = u32::from_le_bytes([remaining[7], remaining[8], remaining[9], remaining[10]])
            as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if remaining.len() < total {
            self.torn = true;
            return Ok(None);
        }

        let body_end = HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            remaining[body_end],
            remaining[body_end + 1],
            remaining[body_end + 2],
            remaining[body_end + 3],
        ]);
        let computed = compute_crc32(&remaining[..body_end]);
        if stored != computed {
            return Err(CodecError::corrupt(
                offset,
                format!("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"),
            ));
        }

        self.pos = start + total;
        Ok(Some(ReadFrame {
            offset,
            encoded_len: total as u64,
            frame: Frame {
                kind,
                payload: remaining[HEADER_SIZE..body_end].to_vec(),
            },
        }))
    }
}

impl Iterator for FrameReader<'_> {
    type Item = CodecResult<ReadFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
