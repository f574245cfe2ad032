use crate::engine::{Config, Engine};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Standard test config: durable writes, background tasks parked on
/// hour-long intervals so tests drive rotation and compaction explicitly.
pub fn test_config(dir: &Path) -> Config {
    init_tracing();
    Config {
        data_dir: dir.to_path_buf(),
        max_file_size: 1024 * 1024,
        sync_on_write: true,
        sync_interval: Duration::from_secs(3600),
        merge_interval: Duration::from_secs(3600),
        track_active_interval: Duration::from_secs(3600),
        read_only: false,
    }
}

/// Config with a tiny rotation threshold, so every handful of records
/// makes the active datafile eligible for rotation.
pub fn small_file_config(dir: &Path) -> Config {
    Config {
        max_file_size: 50,
        ..test_config(dir)
    }
}

/// Open an engine with the standard test config.
pub fn open(dir: &Path) -> Engine {
    Engine::open(test_config(dir)).expect("open")
}

/// Seed `count` sequential `keyN`/`valueN` pairs, rotating the active
/// datafile after every tenth put.
pub fn seed_rotated(engine: &Engine, count: usize) {
    for i in 0..count {
        engine
            .put(format!("key{i}").as_bytes(), format!("value{i}").as_bytes())
            .expect("put");
        if (i + 1) % 10 == 0 {
            engine.rotate_active();
        }
    }
}
