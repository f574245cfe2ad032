//! Append / positional-read cycle tests.

#[cfg(test)]
mod tests {
    use crate::datafile::{Datafile, DatafileError};
    use crate::record::HEADER_LEN;
    use tempfile::TempDir;

    // ----------------------------------------------------------------
    // Append
    // ----------------------------------------------------------------

    #[test]
    fn append_returns_size_and_offset() {
        let tmp = TempDir::new().unwrap();
        let df = Datafile::create(tmp.path(), 1, false).unwrap();

        let (size, offset) = df.append(b"name", b"a").unwrap();
        assert_eq!(size, (HEADER_LEN + 4 + 1) as u64);
        assert_eq!(offset, 0);

        // The next record starts where the previous one ended.
        let (_, offset) = df.append(b"name", b"b").unwrap();
        assert_eq!(offset, size);
        assert_eq!(df.len(), 2 * size);
    }

    #[test]
    fn append_on_read_only_fails() {
        let tmp = TempDir::new().unwrap();
        Datafile::create(tmp.path(), 1, false).unwrap();

        let df = Datafile::open_read_only(tmp.path(), 1).unwrap();
        assert!(matches!(
            df.append(b"k", b"v"),
            Err(DatafileError::ReadOnly)
        ));
    }

    #[test]
    fn sync_on_read_only_fails() {
        let tmp = TempDir::new().unwrap();
        Datafile::create(tmp.path(), 1, false).unwrap();

        let df = Datafile::open_read_only(tmp.path(), 1).unwrap();
        assert!(matches!(df.sync(), Err(DatafileError::ReadOnly)));
    }

    // ----------------------------------------------------------------
    // Read
    // ----------------------------------------------------------------

    #[test]
    fn read_returns_value_at_position() {
        let tmp = TempDir::new().unwrap();
        let df = Datafile::create(tmp.path(), 1, false).unwrap();

        let (size_a, offset_a) = df.append(b"alpha", b"one").unwrap();
        let (size_b, offset_b) = df.append(b"beta", b"two").unwrap();

        assert_eq!(df.read(offset_a, size_a).unwrap(), b"one");
        assert_eq!(df.read(offset_b, size_b).unwrap(), b"two");
    }

    #[test]
    fn read_empty_value_for_tombstone() {
        let tmp = TempDir::new().unwrap();
        let df = Datafile::create(tmp.path(), 1, false).unwrap();

        let (size, offset) = df.append(b"dead", b"").unwrap();
        assert_eq!(df.read(offset, size).unwrap(), b"");
    }

    #[test]
    fn read_past_end_fails() {
        let tmp = TempDir::new().unwrap();
        let df = Datafile::create(tmp.path(), 1, false).unwrap();
        let (size, _) = df.append(b"k", b"v").unwrap();

        assert!(matches!(
            df.read(size, size),
            Err(DatafileError::InvalidRecord)
        ));
    }

    #[test]
    fn read_with_wrong_size_fails() {
        let tmp = TempDir::new().unwrap();
        let df = Datafile::create(tmp.path(), 1, false).unwrap();
        df.append(b"key", b"value").unwrap();
        let (size, offset) = df.append(b"key2", b"value2").unwrap();

        // A size that spans into the previous record's bytes cannot decode
        // into a record of exactly that footprint.
        assert!(matches!(
            df.read(offset, size - 1),
            Err(DatafileError::InvalidRecord)
        ));
    }

    // ----------------------------------------------------------------
    // Reopen
    // ----------------------------------------------------------------

    #[test]
    fn reopen_tracks_existing_length() {
        let tmp = TempDir::new().unwrap();
        let (size, offset) = {
            let df = Datafile::create(tmp.path(), 7, false).unwrap();
            let r = df.append(b"persist", b"me").unwrap();
            df.close().unwrap();
            r
        };

        let df = Datafile::open_read_only(tmp.path(), 7).unwrap();
        assert_eq!(df.len(), size);
        assert_eq!(df.read(offset, size).unwrap(), b"me");
    }

    #[test]
    fn purge_unlinks_the_file() {
        let tmp = TempDir::new().unwrap();
        let df = Datafile::create(tmp.path(), 3, false).unwrap();
        df.append(b"k", b"v").unwrap();

        let path = df.path().to_path_buf();
        assert!(path.exists());

        df.purge().unwrap();
        assert!(!path.exists());
    }
}
