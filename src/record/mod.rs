//! On-disk record codec.
//!
//! A record is the smallest unit persisted to a segment file. Every field
//! is little-endian and the layout is fixed:
//!
//! ```text
//! | crc (4B) | timestamp (8B) | key size (4B) | value size (8B) | key | value |
//! ```
//!
//! The checksum is CRC-32/IEEE computed over `key ‖ value`. A record whose
//! value is empty is a tombstone; keys are required to be non-empty so the
//! two can never be confused.
//!
//! Decoding and checksum verification are split on purpose: callers that
//! read from disk verify separately so corruption can be reported as its
//! own condition rather than a parse failure.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::time::{SystemTime, UNIX_EPOCH};

use crc32fast::Hasher as Crc32;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Layout constants
// ------------------------------------------------------------------------------------------------

/// Width of the CRC-32 field in bytes.
pub const CRC_LEN: usize = 4;

/// Width of the timestamp field in bytes.
pub const TIMESTAMP_LEN: usize = 8;

/// Width of the key-size field in bytes.
pub const KEY_SIZE_LEN: usize = 4;

/// Width of the value-size field in bytes.
pub const VAL_SIZE_LEN: usize = 8;

/// Header size without the trailing key and value bytes (24 bytes).
pub const HEADER_LEN: usize = CRC_LEN + TIMESTAMP_LEN + KEY_SIZE_LEN + VAL_SIZE_LEN;

/// Maximum length of a key in bytes.
pub const MAX_KEY_SIZE: usize = 32768;

/// Maximum length of a value in bytes.
pub const MAX_VALUE_SIZE: usize = 1 << 20;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the record codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The buffer is too short for the declared sizes, or a declared size
    /// is out of bounds.
    #[error("invalid record format")]
    InvalidRecord,

    /// The stored checksum does not match the recomputed one.
    #[error("invalid record checksum. potential data corruption")]
    ChecksumMismatch,
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// In-memory representation of one on-disk record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// CRC-32/IEEE over `key ‖ value`.
    pub checksum: u32,

    /// Unix seconds at the moment of encoding.
    pub timestamp: i64,

    /// Raw key bytes. Never empty.
    pub key: Vec<u8>,

    /// Raw value bytes. Empty for tombstones.
    pub value: Vec<u8>,
}

impl Record {
    /// Builds a record for `key`/`value`, stamping the current time and
    /// computing the checksum.
    pub fn new(key: &[u8], value: &[u8]) -> Self {
        Self {
            checksum: checksum(key, value),
            timestamp: now_unix(),
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Encoded size of this record on disk.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.key.len() + self.value.len()
    }

    /// Whether this record marks a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    /// Serializes the record into the fixed little-endian layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Parses a record from the front of `data`, returning it together
    /// with the number of bytes consumed.
    ///
    /// The checksum is *not* verified here; see [`Record::verify`].
    pub fn decode(data: &[u8]) -> Result<(Self, usize), RecordError> {
        if data.len() < HEADER_LEN {
            return Err(RecordError::InvalidRecord);
        }

        let checksum = le_u32(&data[..CRC_LEN]);
        let timestamp = le_i64(&data[CRC_LEN..CRC_LEN + TIMESTAMP_LEN]);
        let key_size =
            le_u32(&data[CRC_LEN + TIMESTAMP_LEN..CRC_LEN + TIMESTAMP_LEN + KEY_SIZE_LEN])
                as usize;
        let val_size =
            le_u64(&data[CRC_LEN + TIMESTAMP_LEN + KEY_SIZE_LEN..HEADER_LEN]) as usize;

        // A torn or foreign header can declare absurd sizes; reject them
        // before attempting any allocation.
        if key_size == 0 || key_size > MAX_KEY_SIZE || val_size > MAX_VALUE_SIZE {
            return Err(RecordError::InvalidRecord);
        }

        let total = HEADER_LEN + key_size + val_size;
        if data.len() < total {
            return Err(RecordError::InvalidRecord);
        }

        let key = data[HEADER_LEN..HEADER_LEN + key_size].to_vec();
        let value = data[HEADER_LEN + key_size..total].to_vec();

        Ok((
            Self {
                checksum,
                timestamp,
                key,
                value,
            },
            total,
        ))
    }

    /// Recomputes the checksum over `key ‖ value` and compares it against
    /// the stored one.
    pub fn verify(&self) -> Result<(), RecordError> {
        if checksum(&self.key, &self.value) != self.checksum {
            return Err(RecordError::ChecksumMismatch);
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

pub(crate) fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

pub(crate) fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

pub(crate) fn le_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}

/// CRC-32/IEEE over the concatenation of `key` and `value`.
pub fn checksum(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Current time as Unix seconds.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
