//! Hint sidecar file.
//!
//! A hint file `<id>.hint` is a snapshot of its paired segment's key
//! locations, written by compaction so the next boot can rebuild the index
//! without re-reading every record. Per hint record, little-endian:
//!
//! ```text
//! | key size (4B) | record size (8B) | record offset (8B) | key |
//! ```
//!
//! There is no checksum by design: the file is only ever written by the
//! same engine that wrote the segment, and any inconsistency (short read,
//! impossible key size) makes recovery discard it and fall back to a full
//! data-file replay.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;
use tracing::debug;

use crate::record::{self, MAX_KEY_SIZE};

/// File extension for hint files, without the leading dot.
pub const HINT_EXT: &str = "hint";

/// Hint header size: key size + record size + record offset.
pub const HINT_HEADER_LEN: usize = 4 + 8 + 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by hint-file operations.
#[derive(Debug, Error)]
pub enum HintError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Torn trailing bytes or an impossible declared key size.
    #[error("invalid hint record")]
    InvalidRecord,

    /// Mutating operation on a read-only hint file.
    #[error("hint file opened for read-only operations")]
    ReadOnly,

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Hint file
// ------------------------------------------------------------------------------------------------

/// One decoded hint entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintRecord {
    /// Key bytes of the referenced record.
    pub key: Vec<u8>,

    /// Full on-disk size of the referenced record.
    pub record_size: u64,

    /// Absolute offset of the referenced record inside its segment.
    pub record_offset: u64,
}

/// Append-only sidecar listing key locations in its paired segment.
///
/// Sequential reads share the file cursor, so the handle is guarded by a
/// plain mutex rather than a reader/writer lock.
pub struct HintFile {
    file: Mutex<File>,

    path: PathBuf,

    read_only: bool,
}

impl HintFile {
    /// Composes the on-disk path for the hint file paired with segment
    /// `id` inside `dir`.
    pub fn path_for(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("{id}.{HINT_EXT}"))
    }

    /// Opens (or creates) a writable hint file, used as compaction output.
    pub fn create(dir: &Path, id: u64) -> Result<Self, HintError> {
        let path = Self::path_for(dir, id);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            file: Mutex::new(file),
            path,
            read_only: false,
        })
    }

    /// Opens an existing hint file read-only, used for recovery.
    pub fn open_read_only(dir: &Path, id: u64) -> Result<Self, HintError> {
        let path = Self::path_for(dir, id);
        let file = OpenOptions::new().read(true).open(&path)?;

        Ok(Self {
            file: Mutex::new(file),
            path,
            read_only: true,
        })
    }

    /// Appends one hint record for the record of `size` bytes written at
    /// `offset` in the paired segment.
    pub fn append(&self, key: &[u8], size: u64, offset: u64) -> Result<(), HintError> {
        if self.read_only {
            return Err(HintError::ReadOnly);
        }

        let mut buf = Vec::with_capacity(HINT_HEADER_LEN + key.len());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(key);

        let mut file = self
            .file
            .lock()
            .map_err(|_| HintError::Internal("hint lock poisoned".into()))?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Reads the next hint record, advancing the file cursor.
    ///
    /// Returns `Ok(None)` at a clean end of file. Trailing bytes that do
    /// not form a whole record fail with [`HintError::InvalidRecord`].
    pub fn next(&self) -> Result<Option<HintRecord>, HintError> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| HintError::Internal("hint lock poisoned".into()))?;

        let mut header = [0u8; HINT_HEADER_LEN];
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < header.len() {
            return Err(HintError::InvalidRecord);
        }

        let key_size = record::le_u32(&header[..4]) as usize;
        let record_size = record::le_u64(&header[4..12]);
        let record_offset = record::le_u64(&header[12..20]);
        if key_size == 0 || key_size > MAX_KEY_SIZE {
            return Err(HintError::InvalidRecord);
        }

        let mut key = vec![0u8; key_size];
        match file.read_exact(&mut key) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(HintError::InvalidRecord);
            }
            Err(e) => return Err(HintError::Io(e)),
        }

        Ok(Some(HintRecord {
            key,
            record_size,
            record_offset,
        }))
    }

    /// Flushes all buffered writes to disk.
    pub fn sync(&self) -> Result<(), HintError> {
        if self.read_only {
            return Err(HintError::ReadOnly);
        }

        let file = self
            .file
            .lock()
            .map_err(|_| HintError::Internal("hint lock poisoned".into()))?;
        file.sync_all()?;
        Ok(())
    }

    /// Closes the hint file and unlinks it from disk.
    pub fn purge(self) -> Result<(), HintError> {
        let file = self.file.into_inner().unwrap_or_else(|p| p.into_inner());
        drop(file);

        debug!(path = %self.path.display(), "purging hint file");
        fs::remove_file(&self.path)?;
        Ok(())
    }

    /// On-disk path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
