//! # CaskDB
//!
//! An embeddable, persistent key-value store built on a **log-structured,
//! append-only** architecture with a fully in-memory index. Writes are
//! sequential appends; reads are a single positional I/O.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Engine                          │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐   │
//! │  │   Active   │  │    Frozen    │  │   KeyDir    │   │
//! │  │  datafile  │  │  datafiles   │  │ (in-memory  │   │
//! │  │ (writable) │  │ (read-only)  │  │   index)    │   │
//! │  └─────┬──────┘  └──────┬───────┘  └─────────────┘   │
//! │        │   rotate       │   compact                  │
//! │        └─────────►      └────────► merged segment    │
//! │                                    + hint file       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Storage engine: open, get, put, delete, rotate, compact |
//! | [`record`] | On-disk record codec with CRC-32 integrity |
//! | [`datafile`] | Append-only segment files with positional reads |
//! | [`hint`] | Hint sidecar files for fast index rebuild |
//! | [`keydir`] | In-memory mapping from key to on-disk location |
//!
//! ## Key Features
//!
//! - **Append-only writes**: every put and delete is one sequential
//!   append to the active datafile.
//! - **Single-seek reads**: the keydir maps each live key straight to
//!   its segment, offset, and size.
//! - **Crash recovery**: on open, segments are replayed oldest-to-newest;
//!   a torn tail record is skipped, never fatal.
//! - **Hint files**: compaction writes a location sidecar so the next
//!   boot rebuilds the index without re-reading whole segments.
//! - **Background maintenance**: periodic fsync, size-based rotation of
//!   the active datafile, and compaction of frozen segments into a single
//!   merged file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use caskdb::{Config, Engine};
//!
//! let engine = Engine::open(Config {
//!     data_dir: "/tmp/my_db".into(),
//!     ..Config::default()
//! }).unwrap();
//!
//! // Write
//! engine.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello").unwrap(), b"world");
//!
//! // Delete
//! engine.delete(b"hello").unwrap();
//! assert!(engine.get(b"hello").is_err());
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

pub mod datafile;
pub mod engine;
pub mod hint;
pub mod keydir;
pub mod record;

pub use engine::{Config, Engine, EngineError, Stats};
