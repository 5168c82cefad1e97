//! # lsmdb
//!
//! An embeddable, single-process, persistent key-value storage engine
//! built on a **Log-Structured Merge Tree (LSM-tree)** architecture:
//! writes land in an in-memory memtable backed by a write-ahead log,
//! and once the memtable grows past a configurable threshold it is
//! flushed to an immutable, sorted on-disk table (an SSTable).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                      Engine                       │
//! │  ┌────────────────┐        ┌────────────────────┐ │
//! │  │ Active Memtable │        │  SSTables (on disk) │ │
//! │  │   + active WAL  │  roll  │  newest ... oldest  │ │
//! │  │     segment     │ ─────► │                     │ │
//! │  └────────────────┘        └────────────────────┘ │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! A single `RwLock` guards the memtable, the WAL manager, and the
//! SSTable list together, so every mutation is linearized and every
//! read sees a consistent snapshot of all three. There is no
//! background compaction: SSTables accumulate and a point lookup walks
//! them newest-to-oldest, skipping any whose cached key range can't
//! contain the target.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | The storage engine — open, get, set, delete, key_count, close |
//! | [`memtable`] | In-memory sorted write buffer |
//! | [`wal`] | Block-framed, CRC-protected write-ahead log |
//! | [`sstable`] | Immutable, sorted, on-disk tables |
//! | [`io_codec`] | Fixed-width and length-prefixed binary I/O helpers |
//! | [`bitset`] | Packed bit array, a building block for future filter structures |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lsmdb::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! engine.set(b"hello", b"world").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! engine.delete(b"hello").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! engine.close().unwrap();
//! ```

pub mod bitset;
pub mod engine;
pub mod io_codec;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use engine::{Engine, EngineConfig, EngineError};
