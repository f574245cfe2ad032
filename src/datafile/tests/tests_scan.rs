//! Sequential record scanning, as used by recovery and compaction.

#[cfg(test)]
mod tests {
    use crate::datafile::{Datafile, DatafileError};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_walks_all_records_in_order() {
        let tmp = TempDir::new().unwrap();
        let df = Datafile::create(tmp.path(), 1, false).unwrap();
        for i in 0..10 {
            df.append(format!("key{i}").as_bytes(), format!("value{i}").as_bytes())
                .unwrap();
        }

        let mut offset = 0u64;
        let mut seen = Vec::new();
        while offset < df.len() {
            let (record, size) = df.scan_record(offset).unwrap();
            seen.push(record.key);
            offset += size;
        }

        assert_eq!(offset, df.len());
        let expected: Vec<Vec<u8>> = (0..10).map(|i| format!("key{i}").into_bytes()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn scan_returns_tombstones_too() {
        let tmp = TempDir::new().unwrap();
        let df = Datafile::create(tmp.path(), 1, false).unwrap();
        df.append(b"key", b"value").unwrap();
        let (_, offset) = df.append(b"key", b"").unwrap();

        let (record, _) = df.scan_record(offset).unwrap();
        assert!(record.is_tombstone());
        assert_eq!(record.key, b"key");
    }

    #[test]
    fn scan_on_torn_tail_fails() {
        let tmp = TempDir::new().unwrap();
        let offset = {
            let df = Datafile::create(tmp.path(), 1, true).unwrap();
            df.append(b"whole", b"record").unwrap();
            let (_, offset) = df.append(b"torn", b"record").unwrap();
            offset
        };

        // Cut the file mid-way through the second record.
        let path = Datafile::path_for(tmp.path(), 1);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..offset as usize + 5]).unwrap();

        let df = Datafile::open_read_only(tmp.path(), 1).unwrap();
        assert!(df.scan_record(0).is_ok());
        assert!(matches!(
            df.scan_record(offset),
            Err(DatafileError::InvalidRecord)
        ));
    }
}
