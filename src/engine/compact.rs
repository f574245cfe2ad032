//! Rotation, compaction, and index replay.
//!
//! Compaction rewrites every record still referenced by the keydir out of
//! the frozen segments into a single merged segment (id 0) with a paired
//! hint file, then unlinks the originals. The whole protocol runs under
//! the engine's exclusive lock, so writes are serialized against it; any
//! failure before the merged segment is installed leaves the index and
//! the stale segments untouched.

use std::{fs, io, path::Path};

use tracing::{debug, info, warn};

use crate::datafile::{Datafile, DatafileError};
use crate::hint::{HintError, HintFile};
use crate::keydir::{Entry, KeyDir};
use crate::record::now_unix;

use super::{Engine, EngineError, MERGED_FILE_ID};

impl Engine {
    /// Freezes the active datafile and swaps in a fresh one when its
    /// length has reached the configured maximum.
    ///
    /// Returns whether a rotation happened. Allocation failures are
    /// logged and reported as "not rotated".
    pub fn rotate_active(&self) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        let Some(active) = inner.active.as_ref() else {
            return false;
        };

        if active.len() < self.config.max_file_size {
            return false;
        }

        let next_id = inner.active_id + 1;
        let new_active =
            match Datafile::create(&self.config.data_dir, next_id, self.config.sync_on_write) {
                Ok(datafile) => datafile,
                Err(e) => {
                    warn!(error = %e, next_id, "failed to allocate replacement active datafile");
                    return false;
                }
            };

        let sealed_id = inner.active_id;
        let Some(mut sealed) = inner.active.replace(new_active) else {
            return false;
        };
        if let Err(e) = sealed.seal() {
            warn!(error = %e, id = sealed_id, "failed to sync datafile while sealing");
        }

        inner.frozen.insert(sealed_id, sealed);
        inner.active_id = next_id;

        info!(sealed_id, active_id = next_id, "rotated active datafile");
        true
    }

    /// Merges all frozen datafiles into a single segment at id 0 and
    /// unlinks the originals.
    ///
    /// Skipped when fewer than two frozen segments exist. On any failure
    /// before the merged segment is installed, both merged files are
    /// purged and the engine's visible state is unchanged.
    pub fn compact(&self) -> Result<(), EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("engine lock poisoned".into()))?;
        if inner.active.is_none() {
            return Err(EngineError::NotOpen);
        }
        if inner.frozen.len() < 2 {
            return Ok(());
        }

        // 1. Collect every record that the keydir still points at. A
        //    record is live iff the index entry names this exact segment
        //    and offset; tombstones and superseded writes never match.
        let mut live: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut stale: Vec<u64> = Vec::with_capacity(inner.frozen.len());
        for (&id, datafile) in &inner.frozen {
            let mut offset = 0u64;
            while offset < datafile.len() {
                let (record, size) = datafile.scan_record(offset)?;
                if let Some(entry) = self.keydir.get(&record.key) {
                    if entry.file_id == id && entry.record_offset == offset {
                        live.push((record.key, record.value));
                    }
                }
                offset += size;
            }
            stale.push(id);
        }

        // 2. Drop the output of any earlier compaction, sidecar included,
        //    so the new merged files start empty.
        if let Some(previous) = inner.frozen.remove(&MERGED_FILE_ID) {
            if let Err(e) = previous.purge() {
                warn!(error = %e, "failed to purge previous merged datafile");
            }
        }
        remove_if_present(&HintFile::path_for(&self.config.data_dir, MERGED_FILE_ID))?;

        // 3. Create the merged datafile and its hint file.
        let merged = Datafile::create(&self.config.data_dir, MERGED_FILE_ID, false)?;
        let hint = match HintFile::create(&self.config.data_dir, MERGED_FILE_ID) {
            Ok(hint) => hint,
            Err(e) => {
                purge_best_effort(merged);
                return Err(e.into());
            }
        };

        // 4–5. Write out the live records, mirror each into the hint
        //      file, and fsync both.
        let live_count = live.len();
        let merged_entries = match write_merged(&live, &merged, &hint) {
            Ok(entries) => entries,
            Err(e) => {
                purge_best_effort(merged);
                if let Err(e) = hint.purge() {
                    warn!(error = %e, "failed to purge merged hint file");
                }
                return Err(e);
            }
        };

        // 6. Install the merged segment and repoint the index in one
        //    batch. From here on the stale segments are unreferenced.
        inner.frozen.insert(MERGED_FILE_ID, merged);
        self.keydir.put_batch(merged_entries);

        // 7. Unlink the stale segments. Errors leak disk space, never
        //    index consistency, so only the last one is surfaced.
        let mut last_err: Option<EngineError> = None;
        let mut purged = 0;
        for id in stale {
            let Some(datafile) = inner.frozen.remove(&id) else {
                continue;
            };
            match datafile.purge() {
                Ok(()) => purged += 1,
                Err(e) => {
                    warn!(error = %e, id, "failed to purge stale datafile");
                    last_err = Some(e.into());
                }
            }
        }

        info!(live = live_count, purged, "compacted frozen datafiles");
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rebuilds one segment's contribution to the keydir, preferring its
    /// hint sidecar and falling back to a full datafile replay.
    pub(crate) fn replay_segment(dir: &Path, id: u64, keydir: &KeyDir) -> Result<(), EngineError> {
        match Self::replay_hint_file(dir, id, keydir) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                debug!(id, error = %e, "hint replay failed, falling back to datafile");
            }
        }
        Self::replay_datafile(dir, id, keydir)
    }

    /// Replays a hint file into the keydir.
    ///
    /// The entries are buffered and applied only once the whole file has
    /// read cleanly, so a torn hint file never half-populates the index.
    /// Returns `Ok(false)` when no hint file exists.
    fn replay_hint_file(dir: &Path, id: u64, keydir: &KeyDir) -> Result<bool, EngineError> {
        let hint = match HintFile::open_read_only(dir, id) {
            Ok(hint) => hint,
            Err(HintError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let now = now_unix();
        let mut entries = Vec::new();
        while let Some(record) = hint.next()? {
            entries.push((
                record.key,
                Entry {
                    file_id: id,
                    record_size: record.record_size,
                    record_offset: record.record_offset,
                    timestamp: now,
                },
            ));
        }

        debug!(id, entries = entries.len(), "replayed hint file");
        keydir.put_batch(entries);
        Ok(true)
    }

    /// Replays a datafile record-by-record into the keydir.
    ///
    /// Tombstones are reconciled on the spot: the key is dropped from the
    /// index and re-inserted only if a later record writes it again. A
    /// torn trailing record stops the replay without failing the open.
    fn replay_datafile(dir: &Path, id: u64, keydir: &KeyDir) -> Result<(), EngineError> {
        let datafile = Datafile::open_read_only(dir, id)?;

        let mut offset = 0u64;
        while offset < datafile.len() {
            match datafile.scan_record(offset) {
                Ok((record, size)) => {
                    if record.is_tombstone() {
                        keydir.delete(&record.key);
                    } else {
                        keydir.put(
                            record.key,
                            Entry {
                                file_id: id,
                                record_size: size,
                                record_offset: offset,
                                timestamp: record.timestamp,
                            },
                        );
                    }
                    offset += size;
                }
                Err(DatafileError::InvalidRecord) => {
                    warn!(id, offset, "torn record, stopping replay of this segment");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Appends every live record to the merged datafile, mirrors it into the
/// hint file, and fsyncs both. Returns the keydir entries for the new
/// positions.
fn write_merged(
    live: &[(Vec<u8>, Vec<u8>)],
    merged: &Datafile,
    hint: &HintFile,
) -> Result<Vec<(Vec<u8>, Entry)>, EngineError> {
    let now = now_unix();
    let mut entries = Vec::with_capacity(live.len());

    for (key, value) in live {
        let (size, offset) = merged.append(key, value)?;
        hint.append(key, size, offset)?;
        entries.push((
            key.clone(),
            Entry {
                file_id: MERGED_FILE_ID,
                record_size: size,
                record_offset: offset,
                timestamp: now,
            },
        ));
    }

    merged.sync()?;
    hint.sync()?;
    Ok(entries)
}

fn purge_best_effort(datafile: Datafile) {
    if let Err(e) = datafile.purge() {
        warn!(error = %e, "failed to purge merged datafile");
    }
}

/// Unlinks `path`, treating a missing file as success.
fn remove_if_present(path: &Path) -> Result<(), EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
