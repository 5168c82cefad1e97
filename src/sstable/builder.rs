//! SSTable writer: builds a complete, immutable SSTable file from a
//! sorted `(key, value)` iterator in one pass.
//!
//! Building is a strict six-step procedure (data block, index block,
//! meta block, footer, then an atomic rename into place) — the file is
//! never visible to a reader under its final name until every byte has
//! been written and flushed to the temporary file. An empty input
//! materializes no file at all.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::SST_MAGIC;
use crate::io_codec::{write_slice, write_u32, write_u64};
use crate::sstable::SSTableError;

pub struct SstWriter {
    final_path: PathBuf,
}

impl SstWriter {
    pub fn new(final_path: impl Into<PathBuf>) -> Self {
        Self {
            final_path: final_path.into(),
        }
    }

    /// Builds the table from `entries` (must yield ascending, unique
    /// keys). Returns `Ok(false)` without touching the filesystem if
    /// `entries` is empty; `Ok(true)` once the file is visible under
    /// `final_path`.
    pub fn build<I>(&self, entries: I) -> Result<bool, SSTableError>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let tmp_path = self.final_path.with_extension("db.tmp");
        let file = File::create(&tmp_path)?;
        let mut out = BufWriter::new(file);

        let mut offset: u64 = 0;
        let mut index: Vec<(Vec<u8>, u64)> = Vec::new();

        for (key, value) in entries {
            let entry_offset = offset;
            write_slice(&mut out, &key)?;
            write_slice(&mut out, &value)?;
            offset += 4 + key.len() as u64 + 4 + value.len() as u64;
            index.push((key, entry_offset));
        }

        if index.is_empty() {
            drop(out);
            let _ = fs::remove_file(&tmp_path);
            return Ok(false);
        }

        let data_len = offset;

        // Index block.
        let index_start = offset;
        for (key, entry_offset) in &index {
            write_slice(&mut out, key)?;
            write_u64(&mut out, *entry_offset)?;
            offset += 4 + key.len() as u64 + 8;
        }
        let index_len = offset - index_start;

        // Meta block.
        let min_key = &index.first().unwrap().0;
        let max_key = &index.last().unwrap().0;
        let meta_start = offset;
        write_slice(&mut out, min_key)?;
        write_slice(&mut out, max_key)?;
        write_u64(&mut out, index.len() as u64)?;
        offset += 4 + min_key.len() as u64 + 4 + max_key.len() as u64 + 8;
        let meta_len = (offset - meta_start) as u32;

        // Footer.
        write_u64(&mut out, data_len)?;
        write_u64(&mut out, index_len)?;
        write_u32(&mut out, meta_len)?;
        write_u32(&mut out, SST_MAGIC)?;

        out.flush()?;
        out.get_ref().sync_all()?;
        drop(out);

        fs::rename(&tmp_path, &self.final_path)?;
        if let Some(parent) = self.final_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        tracing::debug!(path = %self.final_path.display(), entries = index.len(), "sstable written");
        Ok(true)
    }
}

pub fn path_for_sequence(data_dir: &Path, seq: u64) -> PathBuf {
    data_dir.join(format!("{seq}.db"))
}
