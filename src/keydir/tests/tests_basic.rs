//! Keydir mapping tests.

#[cfg(test)]
mod tests {
    use crate::keydir::{Entry, KeyDir};
    use std::sync::Arc;
    use std::thread;

    fn entry(file_id: u64, offset: u64) -> Entry {
        Entry {
            file_id,
            record_size: 29,
            record_offset: offset,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn put_and_get() {
        let keydir = KeyDir::new();

        assert!(!keydir.put(b"key".to_vec(), entry(1, 0)));
        assert_eq!(keydir.get(b"key"), Some(entry(1, 0)));
        assert_eq!(keydir.get(b"missing"), None);
    }

    #[test]
    fn put_overwrites_and_reports_previous() {
        let keydir = KeyDir::new();

        keydir.put(b"key".to_vec(), entry(1, 0));
        assert!(keydir.put(b"key".to_vec(), entry(1, 29)));
        assert_eq!(keydir.get(b"key"), Some(entry(1, 29)));
        assert_eq!(keydir.len(), 1);
    }

    #[test]
    fn delete_removes_and_reports() {
        let keydir = KeyDir::new();

        keydir.put(b"key".to_vec(), entry(1, 0));
        assert!(keydir.delete(b"key"));
        assert!(!keydir.delete(b"key"));
        assert_eq!(keydir.get(b"key"), None);
        assert!(keydir.is_empty());
    }

    #[test]
    fn put_batch_applies_all_entries() {
        let keydir = KeyDir::new();
        keydir.put(b"old".to_vec(), entry(3, 7));

        let batch: Vec<_> = (0..50u64)
            .map(|i| (format!("key{i}").into_bytes(), entry(0, i * 29)))
            .collect();
        keydir.put_batch(batch);

        assert_eq!(keydir.len(), 51);
        assert_eq!(keydir.get(b"key42"), Some(entry(0, 42 * 29)));
        assert_eq!(keydir.get(b"old"), Some(entry(3, 7)));
    }

    #[test]
    fn list_keys_snapshots_current_state() {
        let keydir = KeyDir::new();
        keydir.put(b"a".to_vec(), entry(1, 0));
        keydir.put(b"b".to_vec(), entry(1, 29));
        keydir.delete(b"a");

        let mut keys = keydir.list_keys();
        keys.sort();
        assert_eq!(keys, vec![b"b".to_vec()]);
    }

    #[test]
    fn concurrent_writers_land_all_keys() {
        let keydir = Arc::new(KeyDir::new());

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let keydir = Arc::clone(&keydir);
                thread::spawn(move || {
                    for i in 0..100u64 {
                        keydir.put(format!("t{t}-k{i}").into_bytes(), entry(t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(keydir.len(), 400);
    }
}
