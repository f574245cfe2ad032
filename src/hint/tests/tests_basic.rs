//! Hint file append / sequential-read tests.

#[cfg(test)]
mod tests {
    use crate::hint::{HintError, HintFile, HintRecord};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn append_then_read_back_in_order() {
        let tmp = TempDir::new().unwrap();
        let hint = HintFile::create(tmp.path(), 0).unwrap();
        hint.append(b"first", 29, 0).unwrap();
        hint.append(b"second", 31, 29).unwrap();
        hint.sync().unwrap();
        drop(hint);

        let hint = HintFile::open_read_only(tmp.path(), 0).unwrap();
        assert_eq!(
            hint.next().unwrap(),
            Some(HintRecord {
                key: b"first".to_vec(),
                record_size: 29,
                record_offset: 0,
            })
        );
        assert_eq!(
            hint.next().unwrap(),
            Some(HintRecord {
                key: b"second".to_vec(),
                record_size: 31,
                record_offset: 29,
            })
        );
        assert_eq!(hint.next().unwrap(), None);
        // Still at end of file on a repeated call.
        assert_eq!(hint.next().unwrap(), None);
    }

    #[test]
    fn empty_file_reads_as_eof() {
        let tmp = TempDir::new().unwrap();
        HintFile::create(tmp.path(), 4).unwrap();

        let hint = HintFile::open_read_only(tmp.path(), 4).unwrap();
        assert_eq!(hint.next().unwrap(), None);
    }

    #[test]
    fn append_on_read_only_fails() {
        let tmp = TempDir::new().unwrap();
        HintFile::create(tmp.path(), 0).unwrap();

        let hint = HintFile::open_read_only(tmp.path(), 0).unwrap();
        assert!(matches!(hint.append(b"k", 1, 0), Err(HintError::ReadOnly)));
    }

    #[test]
    fn torn_header_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let hint = HintFile::create(tmp.path(), 0).unwrap();
        hint.append(b"key", 29, 0).unwrap();
        drop(hint);

        // Leave a whole record plus a few dangling header bytes.
        let path = HintFile::path_for(tmp.path(), 0);
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        fs::write(&path, bytes).unwrap();

        let hint = HintFile::open_read_only(tmp.path(), 0).unwrap();
        assert!(hint.next().unwrap().is_some());
        assert!(matches!(hint.next(), Err(HintError::InvalidRecord)));
    }

    #[test]
    fn torn_key_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let hint = HintFile::create(tmp.path(), 0).unwrap();
        hint.append(b"complete-key", 29, 0).unwrap();
        drop(hint);

        // Cut into the key bytes of the only record.
        let path = HintFile::path_for(tmp.path(), 0);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let hint = HintFile::open_read_only(tmp.path(), 0).unwrap();
        assert!(matches!(hint.next(), Err(HintError::InvalidRecord)));
    }

    #[test]
    fn purge_unlinks_the_file() {
        let tmp = TempDir::new().unwrap();
        let hint = HintFile::create(tmp.path(), 9).unwrap();
        let path = hint.path().to_path_buf();
        assert!(path.exists());

        hint.purge().unwrap();
        assert!(!path.exists());
    }
}
