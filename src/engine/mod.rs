//! The storage engine: coordinates the memtable, the WAL, and the
//! SSTable list behind a single reader-writer lock.
//!
//! `Engine` is the only public entry point into the store. It owns
//! exactly one active [`Memtable`](crate::memtable::Memtable), one
//! [`WalManager`](crate::wal::WalManager), and an ordered list of
//! open [`SSTable`](crate::sstable::SSTable) handles (oldest first,
//! newest last). Every `set`/`delete`/`get`/`key_count` call takes the
//! lock — exclusively for the first two, shared for the latter two —
//! rather than distributing synchronization across the three pieces of
//! state individually. There is no background compaction or rollover
//! thread in this engine: rollover runs synchronously, inline with
//! whichever `set`/`delete` call tripped the memtable size threshold.

mod value;

pub use value::Value;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::memtable::Memtable;
use crate::sstable::builder::{path_for_sequence, SstWriter};
use crate::sstable::{parse_flat_sequence, SSTable, SSTableError};
use crate::wal::{WalError, WalManager, DEFAULT_BLOCK_SIZE};

/// Default memtable size, in bytes of key+value data, at which a
/// `set`/`delete` call triggers a synchronous rollover.
pub const DEFAULT_WRITE_BUFFER_SIZE: i64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt stored value: {0}")]
    CorruptValue(String),
}

/// Tunables for an [`Engine`] instance. Every field has a sensible
/// default; construct a non-default config with
/// `EngineConfig { write_buffer_size: 64 * 1024, ..Default::default() }`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memtable `raw_size()` threshold that triggers rollover.
    pub write_buffer_size: i64,
    /// WAL block size; must match across the lifetime of a given data
    /// directory.
    pub wal_block_size: usize,
    /// Whether every WAL append is flushed to the OS immediately.
    /// Disabling this trades a tighter durability window for higher
    /// throughput.
    pub flush_on_write: bool,
    /// Whether every WAL flush is additionally `fsync`'d to disk.
    /// Hardens against power loss at a further throughput cost; off by
    /// default since `flush_on_write` alone already protects against
    /// an ordinary process crash.
    pub fsync_on_write: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            wal_block_size: DEFAULT_BLOCK_SIZE,
            flush_on_write: true,
            fsync_on_write: false,
        }
    }
}

struct EngineInner {
    data_dir: PathBuf,
    wal: WalManager,
    mem: Memtable,
    sstables: Vec<SSTable>,
    next_sst_seq: u64,
    config: EngineConfig,
}

/// An embedded, single-process, single-version key-value store.
///
/// Cheaply `Clone`-able (an `Arc` around the shared, lock-guarded
/// state), so a single `Engine` can be handed to multiple threads.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
}

impl Engine {
    /// Opens (creating if necessary) the store rooted at `data_dir`,
    /// replaying any WAL segments left behind by an unclean shutdown
    /// and cataloguing any existing SSTables.
    pub fn open(data_dir: impl Into<PathBuf>, config: EngineConfig) -> Result<Self, EngineError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let wal_dir = data_dir.join("wal");
        fs::create_dir_all(&wal_dir)?;

        // GetRecoverIterator() must run before Init(): it renames any
        // leftover segments to `.old` so a crash mid-replay can't cause
        // the same segment to be replayed twice under its original name.
        let recover_iter = WalManager::recover(&wal_dir, config.wal_block_size)?;
        let mut wal = WalManager::init(
            &wal_dir,
            config.wal_block_size,
            config.flush_on_write,
            config.fsync_on_write,
        )?;

        let mut mem = Memtable::new();
        for segment_records in recover_iter {
            for (key, value) in segment_records {
                wal.add(&key, &value)?;
                mem.set(key, value);
            }
        }

        let mut sstables = Vec::new();
        let mut next_sst_seq = 1u64;
        for entry in fs::read_dir(&data_dir)? {
            let path = entry?.path();
            if let Some(seq) = parse_flat_sequence(&path) {
                sstables.push((seq, SSTable::open(&path)?));
                next_sst_seq = next_sst_seq.max(seq + 1);
            }
        }
        sstables.sort_by_key(|(seq, _)| *seq);
        let sstables = sstables.into_iter().map(|(_, t)| t).collect();

        tracing::info!(path = %data_dir.display(), sstables = sstables.len(), "engine opened");

        Ok(Self {
            inner: Arc::new(RwLock::new(EngineInner {
                data_dir,
                wal,
                mem,
                sstables,
                next_sst_seq,
                config,
            })),
        })
    }

    /// Inserts or overwrites `key` with `value`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let serialized = Value::live(value.to_vec()).serialize();
        let mut inner = self.inner.write().unwrap();
        inner.wal.add(key, &serialized)?;
        inner.mem.set(key.to_vec(), serialized);
        inner.maybe_rollover()?;
        Ok(())
    }

    /// Marks `key` as deleted. Deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        let serialized = Value::tombstone().serialize();
        let mut inner = self.inner.write().unwrap();
        inner.wal.add(key, &serialized)?;
        inner.mem.set(key.to_vec(), serialized);
        inner.maybe_rollover()?;
        Ok(())
    }

    /// Returns the live value for `key`, or `None` if it is absent or
    /// has been deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let inner = self.inner.read().unwrap();

        if let Some(raw) = inner.mem.get(key) {
            let value = Value::deserialize(raw)
                .map_err(|e| EngineError::CorruptValue(e.to_string()))?;
            return Ok(value.into_live_payload());
        }

        for table in inner.sstables.iter().rev() {
            match table.get(key) {
                Ok(Some(raw)) => {
                    let value = Value::deserialize(&raw)
                        .map_err(|e| EngineError::CorruptValue(e.to_string()))?;
                    return Ok(value.into_live_payload());
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "treating sstable as a miss after a read error");
                    continue;
                }
            }
        }

        Ok(None)
    }

    /// Upper-bound count of live keys: the memtable's entry count plus
    /// every SSTable's cached entry count. Overwrites and deletes that
    /// span layers are not reconciled, since that would require a full
    /// scan.
    pub fn key_count(&self) -> i64 {
        let inner = self.inner.read().unwrap();
        let mut count = inner.mem.key_count();
        for table in &inner.sstables {
            count += table.meta.key_count as i64;
        }
        count
    }

    /// Flushes and closes the active WAL segment. SSTable handles need
    /// no explicit close since none are held open between operations.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.write().unwrap();
        inner.wal.close()?;
        tracing::info!(path = %inner.data_dir.display(), "engine closed");
        Ok(())
    }
}

impl EngineInner {
    fn maybe_rollover(&mut self) -> Result<(), EngineError> {
        if self.mem.raw_size() < self.config.write_buffer_size {
            return Ok(());
        }
        self.rollover()
    }

    fn rollover(&mut self) -> Result<(), EngineError> {
        if self.mem.is_empty() {
            return Ok(());
        }

        let seq = self.next_sst_seq;
        let path = path_for_sequence(&self.data_dir, seq);
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .mem
            .iterator()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();

        let wrote = match SstWriter::new(&path).build(entries) {
            Ok(wrote) => wrote,
            Err(err) => {
                tracing::error!(error = %err, "aborting rollover: failed to build sstable");
                return Err(err.into());
            }
        };
        if !wrote {
            return Ok(());
        }
        self.next_sst_seq += 1;

        let table = SSTable::open(&path)?;
        self.sstables.push(table);

        // Switching the WAL segment, then removing the retired one,
        // only after the new SSTable is visible on disk: a crash
        // between these two steps just means the retired segment gets
        // replayed again harmlessly at next startup.
        let retired = self.wal.switch_file()?;
        if let Err(err) = fs::remove_file(&retired) {
            tracing::warn!(path = %retired.display(), error = %err, "failed to remove retired WAL segment");
        }

        self.mem = Memtable::new();
        tracing::debug!(seq, "rollover complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &Path) -> Engine {
        Engine::open(dir, EngineConfig::default()).unwrap()
    }

    #[test]
    fn s1_basic_set_and_get() {
        let dir = TempDir::new().unwrap();
        let db = open(dir.path());
        db.set(b"ab1", b"test3").unwrap();
        db.set(b"aa1", b"test2").unwrap();
        db.set(b"ca1", b"test1").unwrap();

        assert_eq!(db.get(b"aa1").unwrap(), Some(b"test2".to_vec()));
        assert_eq!(db.get(b"ac1").unwrap(), None);
    }

    #[test]
    fn delete_shadows_memtable_value() {
        let dir = TempDir::new().unwrap();
        let db = open(dir.path());
        db.set(b"k", b"v").unwrap();
        db.delete(b"k").unwrap();
        assert_eq!(db.get(b"k").unwrap(), None);
    }

    #[test]
    fn s2_delete_shadows_across_rollover() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            write_buffer_size: 1,
            ..EngineConfig::default()
        };
        let db = Engine::open(dir.path(), config).unwrap();
        db.set(b"k", b"v1").unwrap(); // forces a rollover into an sstable
        assert!(db.key_count() >= 1);
        db.delete(b"k").unwrap();
        assert_eq!(db.get(b"k").unwrap(), None);
    }

    #[test]
    fn s4_sstable_range_skip() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            write_buffer_size: 1,
            ..EngineConfig::default()
        };
        let db = Engine::open(dir.path(), config).unwrap();
        db.set(b"a", b"1").unwrap();
        db.set(b"m", b"2").unwrap();
        db.set(b"p", b"3").unwrap();
        db.set(b"z", b"4").unwrap();
        assert_eq!(db.get(b"n").unwrap(), None);
    }

    #[test]
    fn s3_crash_recovery_survives_unclosed_restart() {
        let dir = TempDir::new().unwrap();
        let key = vec![b'k'; 10_000];
        let value = vec![b'v'; 10_000];
        {
            let db = open(dir.path());
            db.set(&key, &value).unwrap();
            // Process "crashes": db is dropped without calling close().
        }
        let db = open(dir.path());
        assert_eq!(db.get(&key).unwrap(), Some(value));
    }

    #[test]
    fn key_count_includes_sstables_after_rollover() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            write_buffer_size: 1,
            ..EngineConfig::default()
        };
        let db = Engine::open(dir.path(), config).unwrap();
        db.set(b"a", b"1").unwrap();
        db.set(b"b", b"2").unwrap();
        assert_eq!(db.key_count(), 2);
    }

    #[test]
    fn reopen_after_clean_close_preserves_data() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(dir.path());
            db.set(b"a", b"1").unwrap();
            db.close().unwrap();
        }
        let db = open(dir.path());
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn delete_of_absent_key_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let db = open(dir.path());
        db.delete(b"absent").unwrap();
    }
}
