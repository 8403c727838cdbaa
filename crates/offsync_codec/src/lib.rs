//! # offsync codec
//!
//! Binary framing for journal records.
//!
//! Every record is wrapped in an envelope:
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | length (4) | payload (length) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers everything before it.
//! Payloads are CBOR produced from `serde` types via [`to_cbor`].
//!
//! ## Usage
//!
//! ```
//! use offsync_codec::{encode_frame, FrameReader};
//!
//! let mut journal = encode_frame(1, b"first").unwrap();
//! journal.extend(encode_frame(2, b"second").unwrap());
//!
//! let frames: Vec<_> = FrameReader::new(&journal).collect::<Result<_, _>>().unwrap();
//! assert_eq!(frames.len(), 2);
//! assert_eq!(frames[1].frame.payload, b"second");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod crc;
mod error;
mod frame;

pub use cbor::{from_cbor, to_cbor};
pub use crc::compute_crc32;
pub use error::{CodecError, CodecResult};
pub use frame::{
    encode_frame, Frame, FrameReader, ReadFrame, CRC_SIZE, FRAME_MAGIC, FRAME_VERSION,
    HEADER_SIZE,
};
