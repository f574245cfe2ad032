//! # Storage engine
//!
//! The engine composes the lower layers into a log-structured key-value
//! store:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Engine                           │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌────────────┐  │
//! │  │   Active    │  │      Frozen      │  │   KeyDir   │  │
//! │  │  datafile   │  │    datafiles     │  │ (in-memory │  │
//! │  │ (writable)  │  │   (read-only)    │  │   index)   │  │
//! │  └──────┬──────┘  └────────┬─────────┘  └────────────┘  │
//! │         │  rotate          │  compact                   │
//! │         └──────────►       └────────► 0.data + 0.hint   │
//! │                                                         │
//! │  background: periodic sync · rotation check · merge     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every write appends to the single *active* datafile and then updates
//! the keydir, so the index always points at durable bytes. Reads resolve
//! the keydir entry to a segment handle and issue one positional read.
//! Deletes append a tombstone and drop the key from the keydir.
//!
//! ## Concurrency model
//!
//! One `RwLock` guards the active datafile, the frozen-segment map, and
//! the active id. Mutators (`put`, `delete`, `sync`, `close`,
//! `rotate_active`, `compact`) take it exclusively; `get`, `list_keys`,
//! and `stats` take it shared, since positional reads never interact with the
//! append cursor, and the bytes behind any keydir entry are immutable
//! once written. The keydir carries its own leaf lock.
//!
//! ## Recovery
//!
//! On open, every `<id>.data` file is replayed oldest-to-newest into the
//! keydir, from its hint sidecar when one reads cleanly, otherwise from
//! the datafile itself. A torn trailing record only truncates the replay
//! of that segment; the bytes beyond it become dead space until the next
//! compaction rewrites the segment.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

mod compact;
mod tasks;

use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::{Arc, Mutex, RwLock},
    thread::JoinHandle,
    time::Duration,
};

use thiserror::Error;
use tracing::info;

use crate::datafile::{DATAFILE_EXT, Datafile, DatafileError};
use crate::hint::HintError;
use crate::keydir::{Entry, KeyDir};
use crate::record::{MAX_KEY_SIZE, MAX_VALUE_SIZE, now_unix};

use tasks::Shutdown;

// ------------------------------------------------------------------------------------------------
// Defaults and constants
// ------------------------------------------------------------------------------------------------

/// Default rotation threshold for the active datafile (64 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 << 20;

/// Default background fsync period when not syncing on every write.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Default compaction period.
pub const DEFAULT_MERGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default rotation-check base period.
pub const DEFAULT_TRACK_ACTIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Segment id reserved for compaction output.
pub const MERGED_FILE_ID: u64 = 0;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation on a closed engine.
    #[error("database not open")]
    NotOpen,

    /// The configuration has no data directory.
    #[error("data directory is required")]
    DirectoryRequired,

    /// Empty key.
    #[error("key is required")]
    KeyRequired,

    /// Key exceeds the maximum key size.
    #[error("key is too large")]
    KeyTooLarge,

    /// Value exceeds the maximum value size.
    #[error("value is too large")]
    ValTooLarge,

    /// The key is not present in the index.
    #[error("key not found")]
    KeyNotFound,

    /// Short read, undecodable bytes, or checksum mismatch on disk.
    #[error("invalid record format")]
    InvalidRecord,

    /// The OS accepted fewer bytes than one encoded record.
    #[error("incomplete write")]
    IncompleteWrite,

    /// Mutating operation on a read-only engine.
    #[error("database opened for read-only operations")]
    ReadOnly,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DatafileError> for EngineError {
    fn from(err: DatafileError) -> Self {
        match err {
            DatafileError::Io(e) => EngineError::Io(e),
            DatafileError::InvalidRecord => EngineError::InvalidRecord,
            DatafileError::IncompleteWrite => EngineError::IncompleteWrite,
            DatafileError::ReadOnly => EngineError::ReadOnly,
            DatafileError::Internal(msg) => EngineError::Internal(msg),
        }
    }
}

impl From<HintError> for EngineError {
    fn from(err: HintError) -> Self {
        match err {
            HintError::Io(e) => EngineError::Io(e),
            HintError::InvalidRecord => EngineError::InvalidRecord,
            HintError::ReadOnly => EngineError::ReadOnly,
            HintError::Internal(msg) => EngineError::Internal(msg),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance.
///
/// Zero-valued sizes and intervals are replaced with their defaults at
/// open time; only the data directory is mandatory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the segment and hint files. Must exist.
    pub data_dir: PathBuf,

    /// Rotation threshold for the active datafile, in bytes.
    pub max_file_size: u64,

    /// Fsync the active datafile after every append.
    pub sync_on_write: bool,

    /// Background fsync period, used when `sync_on_write` is off.
    pub sync_interval: Duration,

    /// Compaction period.
    pub merge_interval: Duration,

    /// Rotation-check base period. Doubles after an idle check, capped at
    /// ten minutes, and resets once a rotation happens.
    pub track_active_interval: Duration,

    /// Reject all mutating operations and run no background tasks.
    pub read_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            sync_on_write: false,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            merge_interval: DEFAULT_MERGE_INTERVAL,
            track_active_interval: DEFAULT_TRACK_ACTIVE_INTERVAL,
            read_only: false,
        }
    }
}

impl Config {
    fn validate(&mut self) -> Result<(), EngineError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(EngineError::DirectoryRequired);
        }
        if self.max_file_size == 0 {
            self.max_file_size = DEFAULT_MAX_FILE_SIZE;
        }
        if self.sync_interval.is_zero() {
            self.sync_interval = DEFAULT_SYNC_INTERVAL;
        }
        if self.merge_interval.is_zero() {
            self.merge_interval = DEFAULT_MERGE_INTERVAL;
        }
        if self.track_active_interval.is_zero() {
            self.track_active_interval = DEFAULT_TRACK_ACTIVE_INTERVAL;
        }
        Ok(())
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Id of the active datafile.
    pub active_id: u64,
    /// Current length of the active datafile in bytes.
    pub active_len: u64,
    /// Number of frozen datafiles.
    pub frozen_count: usize,
    /// Number of live keys in the index.
    pub key_count: usize,
}

// ------------------------------------------------------------------------------------------------
// Engine Core
// ------------------------------------------------------------------------------------------------

pub(crate) struct EngineInner {
    /// The single writable datafile. `None` once the engine is closed.
    active: Option<Datafile>,

    /// Id of the active datafile. Never reused by a frozen segment.
    active_id: u64,

    /// Map of file ids to frozen, read-only datafiles.
    frozen: HashMap<u64, Datafile>,
}

/// The engine handle.
///
/// Cheap to clone and safe to share across threads; all clones observe
/// the same store.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,

    keydir: Arc<KeyDir>,

    config: Arc<Config>,

    /// Cooperative cancellation signal for the background tasks.
    shutdown: Arc<Shutdown>,

    /// Handles of the spawned background tasks, joined by `close`.
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            keydir: Arc::clone(&self.keydir),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl Engine {
    /// Opens a new or existing store rooted at `config.data_dir`.
    ///
    /// Existing segments are replayed oldest-to-newest to rebuild the
    /// index, then registered as frozen. A fresh active datafile is
    /// allocated one past the highest discovered id. Unless the engine is
    /// read-only, the background tasks (periodic sync when not syncing on
    /// write, rotation check, compaction) are started before returning.
    ///
    /// Only one process may open a store directory in read-write mode at
    /// a time.
    // TODO: hold a lock file so a second read-write process is rejected
    // instead of silently corrupting the store.
    pub fn open(mut config: Config) -> Result<Self, EngineError> {
        config.validate()?;

        let keydir = Arc::new(KeyDir::new());
        let mut frozen = HashMap::new();

        // 1. Discover existing segments, oldest id first.
        let mut ids = Vec::new();
        for dir_entry in fs::read_dir(&config.data_dir)? {
            let path = dir_entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(&format!(".{DATAFILE_EXT}")))
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        // 2. Replay each segment into the keydir, then register it frozen.
        for &id in &ids {
            Self::replay_segment(&config.data_dir, id, &keydir)?;
            let datafile = Datafile::open_read_only(&config.data_dir, id)?;
            frozen.insert(id, datafile);
        }

        // 3. Allocate the active datafile one past the highest known id.
        let active_id = ids.last().map_or(1, |last| last + 1);
        let active = Datafile::create(&config.data_dir, active_id, config.sync_on_write)?;

        info!(
            dir = %config.data_dir.display(),
            segments = ids.len(),
            keys = keydir.len(),
            active_id,
            read_only = config.read_only,
            "opened store"
        );

        let engine = Self {
            inner: Arc::new(RwLock::new(EngineInner {
                active: Some(active),
                active_id,
                frozen,
            })),
            keydir,
            config: Arc::new(config),
            shutdown: Arc::new(Shutdown::new()),
            tasks: Arc::new(Mutex::new(Vec::new())),
        };

        if !engine.config.read_only {
            engine.spawn_tasks();
        }

        Ok(engine)
    }

    /// Retrieves the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))?;
        let active = inner.active.as_ref().ok_or(EngineError::NotOpen)?;

        let entry = self.keydir.get(key).ok_or(EngineError::KeyNotFound)?;

        let datafile = if entry.file_id == inner.active_id {
            active
        } else {
            inner.frozen.get(&entry.file_id).ok_or_else(|| {
                EngineError::Internal(format!("segment {} is not open", entry.file_id))
            })?
        };

        Ok(datafile.read(entry.record_offset, entry.record_size)?)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        validate_entry(key, value)?;
        if self.config.read_only {
            return Err(EngineError::ReadOnly);
        }

        let inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))?;
        let active = inner.active.as_ref().ok_or(EngineError::NotOpen)?;

        // Append first, index second: the keydir must never point at
        // bytes that are not on disk.
        let (size, offset) = active.append(key, value)?;

        self.keydir.put(
            key.to_vec(),
            Entry {
                file_id: inner.active_id,
                record_size: size,
                record_offset: offset,
                timestamp: now_unix(),
            },
        );
        Ok(())
    }

    /// Removes `key` by appending a tombstone and dropping the index
    /// entry.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        if self.config.read_only {
            return Err(EngineError::ReadOnly);
        }

        let inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))?;
        let active = inner.active.as_ref().ok_or(EngineError::NotOpen)?;

        if self.keydir.get(key).is_none() {
            return Err(EngineError::KeyNotFound);
        }

        active.append(key, &[])?;
        self.keydir.delete(key);
        Ok(())
    }

    /// Snapshot of all live keys, in unspecified order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))?;
        if inner.active.is_none() {
            return Err(EngineError::NotOpen);
        }

        Ok(self.keydir.list_keys())
    }

    /// Fsyncs the active datafile.
    pub fn sync(&self) -> Result<(), EngineError> {
        if self.config.read_only {
            return Err(EngineError::ReadOnly);
        }

        let inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))?;
        let active = inner.active.as_ref().ok_or(EngineError::NotOpen)?;

        Ok(active.sync()?)
    }

    /// Shuts the engine down: stops the background tasks, then fsyncs and
    /// closes the active and all frozen datafiles.
    ///
    /// Subsequent operations fail with [`EngineError::NotOpen`]. Calling
    /// `close` again is a no-op.
    pub fn close(&self) -> Result<(), EngineError> {
        // Stop the background tasks before taking the engine lock so a
        // mid-flight compaction can finish rather than deadlock.
        self.shutdown.signal();
        let handles = {
            let mut tasks = self
                .tasks
                .lock()
                .map_err(|_| EngineError::Internal("task list lock poisoned".into()))?;
            std::mem::take(&mut *tasks)
        };
        for handle in handles {
            let _ = handle.join();
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))?;

        let Some(active) = inner.active.take() else {
            return Ok(());
        };
        active.close()?;

        for (_, datafile) in inner.frozen.drain() {
            datafile.close()?;
        }

        info!("closed store");
        Ok(())
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<Stats, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))?;
        let active = inner.active.as_ref().ok_or(EngineError::NotOpen)?;

        Ok(Stats {
            active_id: inner.active_id,
            active_len: active.len(),
            frozen_count: inner.frozen.len(),
            key_count: self.keydir.len(),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Runs a key-value pair against the size constraints.
fn validate_entry(key: &[u8], value: &[u8]) -> Result<(), EngineError> {
    if key.is_empty() {
        return Err(EngineError::KeyRequired);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::KeyTooLarge);
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(EngineError::ValTooLarge);
    }
    Ok(())
}
