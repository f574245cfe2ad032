//! Segment (data) file.
//!
//! A datafile is one append-only `<id>.data` file holding a sequence of
//! encoded [`Record`]s. Exactly one datafile per engine is *active* and
//! accepts appends; all others are frozen and opened read-only.
//!
//! # Concurrency model
//!
//! A single `RwLock` guards the file handle together with the tracked byte
//! length. Appenders take the exclusive side; readers take the shared side
//! and use positional I/O (`pread`), which never touches the append cursor,
//! so reads proceed concurrently with in-flight appends.
//!
//! # Durability
//!
//! When opened with `sync_on_write`, every append is followed by an
//! `fsync` before it returns. Otherwise durability is deferred to the
//! engine's periodic [`sync`](Datafile::sync) or to [`close`](Datafile::close).

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
    io::{self, Write},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::RwLock,
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::record::{self, HEADER_LEN, MAX_KEY_SIZE, MAX_VALUE_SIZE, Record, RecordError};

/// File extension for segment files, without the leading dot.
pub const DATAFILE_EXT: &str = "data";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by datafile operations.
#[derive(Debug, Error)]
pub enum DatafileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Short read, undecodable bytes, or a checksum mismatch at the
    /// requested position.
    #[error("invalid record format")]
    InvalidRecord,

    /// The OS accepted fewer bytes than the encoded record.
    #[error("incomplete write")]
    IncompleteWrite,

    /// Mutating operation on a read-only datafile.
    #[error("datafile opened for read-only operations")]
    ReadOnly,

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RecordError> for DatafileError {
    // Checksum mismatches surface as invalid records at this layer.
    fn from(_: RecordError) -> Self {
        DatafileError::InvalidRecord
    }
}

// ------------------------------------------------------------------------------------------------
// Datafile Core
// ------------------------------------------------------------------------------------------------

struct Inner {
    file: File,

    /// Current file content size. The size before an append is that
    /// record's offset.
    size: u64,
}

/// One append-only segment file on disk.
pub struct Datafile {
    inner: RwLock<Inner>,

    /// Monotonically assigned integer identifier (`<id>.data`).
    id: u64,

    path: PathBuf,

    read_only: bool,

    /// Whether to fsync after every append.
    sync_on_write: bool,
}

impl Datafile {
    /// Composes the on-disk path for segment `id` inside `dir`.
    pub fn path_for(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("{id}.{DATAFILE_EXT}"))
    }

    /// Opens (or creates) a writable datafile, used for the active segment
    /// and for compaction output.
    pub fn create(dir: &Path, id: u64, sync_on_write: bool) -> Result<Self, DatafileError> {
        Self::open_at(Self::path_for(dir, id), id, false, sync_on_write)
    }

    /// Opens an existing datafile read-only, used for frozen segments.
    pub fn open_read_only(dir: &Path, id: u64) -> Result<Self, DatafileError> {
        Self::open_at(Self::path_for(dir, id), id, true, false)
    }

    fn open_at(
        path: PathBuf,
        id: u64,
        read_only: bool,
        sync_on_write: bool,
    ) -> Result<Self, DatafileError> {
        let file = if read_only {
            OpenOptions::new().read(true).open(&path)?
        } else {
            OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&path)?
        };

        let size = file.metadata()?.len();
        debug!(path = %path.display(), size, read_only, "opened datafile");

        Ok(Self {
            inner: RwLock::new(Inner { file, size }),
            id,
            path,
            read_only,
            sync_on_write,
        })
    }

    /// Appends a key-value pair as one encoded record.
    ///
    /// Returns the encoded record size and the offset it was written at.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<(u64, u64), DatafileError> {
        if self.read_only {
            return Err(DatafileError::ReadOnly);
        }

        let record = Record::new(key, value);
        let encoded = record.encode();

        let mut inner = self
            .inner
            .write()
            .map_err(|_| DatafileError::Internal("datafile lock poisoned".into()))?;

        // The file is opened in append mode, so this lands at end-of-file
        // in a single write call.
        let written = inner.file.write(&encoded)?;
        if written < encoded.len() {
            return Err(DatafileError::IncompleteWrite);
        }

        if self.sync_on_write {
            inner.file.sync_all()?;
        }

        // The size before this write is the record's offset.
        let offset = inner.size;
        inner.size += encoded.len() as u64;

        trace!(id = self.id, offset, size = encoded.len(), "appended record");
        Ok((encoded.len() as u64, offset))
    }

    /// Reads the record at `(offset, size)` and returns its value bytes.
    ///
    /// The stored checksum is verified; any mismatch, short read, or size
    /// disagreement fails with [`DatafileError::InvalidRecord`].
    pub fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, DatafileError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DatafileError::Internal("datafile lock poisoned".into()))?;

        let mut buf = vec![0u8; size as usize];
        read_exact_at(&inner.file, &mut buf, offset)?;

        let (record, consumed) = Record::decode(&buf)?;
        if consumed as u64 != size {
            return Err(DatafileError::InvalidRecord);
        }
        record.verify()?;

        Ok(record.value)
    }

    /// Reads and decodes the whole record starting at `offset`, returning
    /// it together with its on-disk footprint.
    ///
    /// Used by recovery and compaction to walk a segment sequentially.
    pub fn scan_record(&self, offset: u64) -> Result<(Record, u64), DatafileError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DatafileError::Internal("datafile lock poisoned".into()))?;

        let mut header = [0u8; HEADER_LEN];
        read_exact_at(&inner.file, &mut header, offset)?;

        let key_size = record::le_u32(&header[12..16]) as usize;
        let val_size = record::le_u64(&header[16..24]) as usize;
        if key_size == 0 || key_size > MAX_KEY_SIZE || val_size > MAX_VALUE_SIZE {
            return Err(DatafileError::InvalidRecord);
        }

        let total = HEADER_LEN + key_size + val_size;
        let mut buf = vec![0u8; total];
        read_exact_at(&inner.file, &mut buf, offset)?;

        let (record, _) = Record::decode(&buf)?;
        record.verify()?;

        Ok((record, total as u64))
    }

    /// Syncs and marks the datafile read-only, used when the active
    /// segment is rotated out into the frozen map.
    pub(crate) fn seal(&mut self) -> Result<(), DatafileError> {
        if self.read_only {
            return Ok(());
        }

        {
            let inner = self
                .inner
                .write()
                .map_err(|_| DatafileError::Internal("datafile lock poisoned".into()))?;
            inner.file.sync_all()?;
        }

        self.read_only = true;
        self.sync_on_write = false;
        Ok(())
    }

    /// Flushes all buffered writes to disk.
    pub fn sync(&self) -> Result<(), DatafileError> {
        if self.read_only {
            return Err(DatafileError::ReadOnly);
        }

        let inner = self
            .inner
            .write()
            .map_err(|_| DatafileError::Internal("datafile lock poisoned".into()))?;
        inner.file.sync_all()?;
        Ok(())
    }

    /// Flushes pending writes if the file is writable. The descriptor
    /// itself is released when the handle is dropped.
    pub fn close(&self) -> Result<(), DatafileError> {
        if self.read_only {
            return Ok(());
        }

        let inner = self
            .inner
            .write()
            .map_err(|_| DatafileError::Internal("datafile lock poisoned".into()))?;
        inner.file.sync_all()?;
        Ok(())
    }

    /// Closes the datafile and unlinks it from disk.
    ///
    /// Callers must have removed every index reference to this segment
    /// beforehand.
    pub fn purge(self) -> Result<(), DatafileError> {
        let inner = self.inner.into_inner().unwrap_or_else(|p| p.into_inner());
        drop(inner);

        debug!(id = self.id, path = %self.path.display(), "purging datafile");
        fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Current content length in bytes.
    pub fn len(&self) -> u64 {
        match self.inner.read() {
            Ok(inner) => inner.size,
            Err(poisoned) => poisoned.into_inner().size,
        }
    }

    /// Whether the datafile holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segment identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// On-disk path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the datafile rejects appends.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Positional read of exactly `buf.len()` bytes; a short read (end of
/// file before the buffer fills) is reported as an invalid record.
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<(), DatafileError> {
    match file.read_exact_at(buf, offset) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DatafileError::InvalidRecord),
        Err(e) => Err(DatafileError::Io(e)),
    }
}
