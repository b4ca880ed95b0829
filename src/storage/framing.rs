// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Record framings — the two on-disk record layouts and their detection.
//!
//! ## File Layout
//!
//! A bucket file is a plain concatenation of framed records, no file header
//! or trailer. Every record in one file uses the same framing.
//!
//! ```text
//! [legacy header: 16 bytes per record]
//!   key    : u64 (LE) — top 32 bits are a POSIX timestamp
//!   len    : u64 (LE) — value length in bytes
//!
//! [v1 header: 24 bytes per record]
//!   key    : u64 (LE)
//!   len    : u64 (LE)
//!   parity : u64 (LE) — key ^ len, so the three words XOR to zero
//!
//! [value  : len bytes]
//! ```
//!
//! New buckets are always written v1; legacy buckets remain readable, so a
//! channel may mix both framings across its files.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub const LEGACY_HEADER_SIZE: usize = 16;
pub const V1_HEADER_SIZE: usize = 24;

/// Largest representable value length.
pub const MAX_VALUE_LEN: u64 = i32::MAX as u64;

/// Decoded record header, framing-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: u64,
    pub len: u64,
}

impl RecordHeader {
    /// POSIX timestamp carried in the key's top 32 bits.
    pub fn timestamp(&self) -> u64 {
        self.key >> 32
    }
}

/// Why a header could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Partial record at EOF — normal while a writer is appending.
    Tail,
    /// Parity mismatch or impossible length. The rest of the file is
    /// untrustworthy.
    Corrupt,
}

/// On-disk framing of one bucket file, fixed at file creation and inferred
/// per file when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Legacy,
    V1,
}

impl Framing {
    pub fn header_size(self) -> usize {
        match self {
            Framing::Legacy => LEGACY_HEADER_SIZE,
            Framing::V1 => V1_HEADER_SIZE,
        }
    }

    /// Decode one header from the front of `buf`.
    pub fn decode_header(self, buf: &[u8]) -> Result<RecordHeader, FrameError> {
        if buf.len() < self.header_size() {
            return Err(FrameError::Tail);
        }
        let mut rdr = buf;
        let key = rdr.read_u64::<LittleEndian>().map_err(|_| FrameError::Tail)?;
        let len = rdr.read_u64::<LittleEndian>().map_err(|_| FrameError::Tail)?;
        if let Framing::V1 = self {
            let parity = rdr.read_u64::<LittleEndian>().map_err(|_| FrameError::Tail)?;
            if key ^ len ^ parity != 0 {
                return Err(FrameError::Corrupt);
            }
        }
        if len > MAX_VALUE_LEN {
            return Err(FrameError::Corrupt);
        }
        Ok(RecordHeader { key, len })
    }

    /// Preformat header + value into `scratch` so the caller can append the
    /// whole record with a single buffered write. A flush therefore never
    /// splits a record.
    pub fn encode_record(self, key: u64, value: &[u8], scratch: &mut Vec<u8>) {
        scratch.clear();
        scratch.reserve(self.header_size() + value.len());
        let len = value.len() as u64;
        scratch.write_u64::<LittleEndian>(key).expect("vec write");
        scratch.write_u64::<LittleEndian>(len).expect("vec write");
        if let Framing::V1 = self {
            scratch.write_u64::<LittleEndian>(key ^ len).expect("vec write");
        }
        scratch.extend_from_slice(value);
    }
}

/// Infer the framing of a bucket file from its first bytes.
///
/// The first 24 bytes are tried as a v1 header: parity XOR zero, length in
/// range and fitting inside the file. Anything else is legacy. A legacy
/// record whose first 24 bytes happen to satisfy all three conditions would
/// be misread; the probability is negligible and accepted for format
/// compatibility (no file magic exists in either framing).
pub fn detect(first: &[u8], file_len: u64) -> Framing {
    if first.len() >= V1_HEADER_SIZE {
        let mut rdr = first;
        let key = rdr.read_u64::<LittleEndian>().unwrap_or(0);
        let len = rdr.read_u64::<LittleEndian>().unwrap_or(u64::MAX);
        let parity = rdr.read_u64::<LittleEndian>().unwrap_or(u64::MAX);
        if key ^ len ^ parity == 0
            && len <= MAX_VALUE_LEN
            && V1_HEADER_SIZE as u64 + len <= file_len
        {
            return Framing::V1;
        }
    }
    Framing::Legacy
}
