//! Immutable, on-disk sorted string tables.
//!
//! An SSTable file has four regions written once, in order, and never
//! revisited: a data block of `(key, value)` tuples in ascending key
//! order, an index block mapping each key to its data-block offset, a
//! meta block recording the min/max key and entry count, and a fixed
//! 24-byte footer. See [`builder::SstWriter`] for the writer and
//! [`SSTable`] below for the reader.
//!
//! A table's meta block is read once, at open time, and cached in
//! memory (`min_key`/`max_key`/`key_count`) so that a lookup for a key
//! outside the table's range never needs to open the file at all. Every
//! other read opens the file fresh, reads what it needs, and lets the
//! handle drop at the end of the call — matching the original engine's
//! lazy-open / explicit-close discipline rather than keeping a
//! persistent memory-mapped handle per table.

pub mod builder;

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::io_codec::{read_slice, read_u32, read_u64};

/// Fixed trailer size: `u64 data_len | u64 index_len | u32 meta_len | u32 magic`.
pub const FOOTER_SIZE: u64 = 24;

/// Magic constant terminating every SSTable file, regardless of naming
/// scheme (flat or level-aware).
pub const SST_MAGIC: u32 = 0x03D4_BFDF;

#[derive(Debug, Error)]
pub enum SSTableError {
    #[error("SSTable I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SSTable footer magic mismatch (file is not a valid table)")]
    BadMagic,
    #[error("SSTable file too small to contain a footer")]
    TooSmall,
    #[error("corrupt SSTable index entry: {0}")]
    CorruptIndex(String),
}

#[derive(Debug, Clone, Copy)]
struct Footer {
    data_len: u64,
    index_len: u64,
    meta_len: u32,
}

/// The three meta-block fields, cached in memory for the lifetime of
/// an open [`SSTable`] handle.
#[derive(Debug, Clone)]
pub struct Meta {
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub key_count: u64,
}

/// Result of [`SSTable::find_key_in_index`]. `NotFound` is an ordinary,
/// common outcome, not an error — it is a distinct variant rather than
/// a sentinel offset so it can never be confused with a real data
/// offset of `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    Found(u64),
    NotFound,
}

/// A handle to one immutable on-disk table: its path plus the cached
/// meta block. File handles are opened per-operation and closed (via
/// `Drop`) at the end of that operation.
pub struct SSTable {
    path: PathBuf,
    footer: Footer,
    pub meta: Meta,
}

impl SSTable {
    /// Opens `path`, reading only the footer and meta block (no data or
    /// index I/O happens here).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SSTableError> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let footer = read_footer(&mut file)?;
        let meta = read_meta(&mut file, &footer)?;
        Ok(Self { path, footer, meta })
    }

    /// Whether `key` could possibly be in this table, based on the
    /// cached meta block alone — no I/O.
    pub fn could_contain(&self, key: &[u8]) -> bool {
        key >= self.meta.min_key.as_slice() && key <= self.meta.max_key.as_slice()
    }

    /// Looks up `key`, returning its raw stored value (still carrying
    /// the engine's live/tombstone flag byte) if present. Opens no file
    /// at all if the meta block already rules the key out.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SSTableError> {
        if !self.could_contain(key) {
            return Ok(None);
        }
        let mut file = File::open(&self.path)?;
        match self.find_key_in_index(&mut file, key)? {
            FindResult::NotFound => Ok(None),
            FindResult::Found(offset) => Ok(Some(self.read_value_at(&mut file, offset)?)),
        }
        // `file` drops here, closing the handle.
    }

    /// Sequentially scans the index block for an exact match. A binary
    /// search would also satisfy the table's invariants (the index is
    /// stored in ascending key order) but is not required by the
    /// baseline format.
    fn find_key_in_index(&self, file: &mut File, key: &[u8]) -> Result<FindResult, SSTableError> {
        let index_start = self.footer.data_len;
        file.seek(SeekFrom::Start(index_start))?;
        let mut reader = BufReader::new(file).take(self.footer.index_len);

        loop {
            let entry_key = match try_read_slice(&mut reader)? {
                Some(k) => k,
                None => return Ok(FindResult::NotFound),
            };
            let offset = read_u64(&mut reader)
                .map_err(|e| SSTableError::CorruptIndex(e.to_string()))?;
            if entry_key == key {
                return Ok(FindResult::Found(offset));
            }
        }
    }

    /// Reads back the `(key, value)` tuple stored at `offset` in the
    /// data block and returns the value unchanged.
    fn read_value_at(&self, file: &mut File, offset: u64) -> Result<Vec<u8>, SSTableError> {
        file.seek(SeekFrom::Start(offset))?;
        let _key = read_slice(file)?;
        let value = read_slice(file)?;
        Ok(value)
    }
}

/// Like [`read_slice`], but returns `Ok(None)` at a clean end of
/// stream instead of erroring, so index scanning can detect "ran off
/// the end without a match" versus "the index itself is corrupt".
fn try_read_slice<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>, SSTableError> {
    match read_u32(r) {
        Ok(len) => {
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf)
                .map_err(|e| SSTableError::CorruptIndex(e.to_string()))?;
            Ok(Some(buf))
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(SSTableError::CorruptIndex(e.to_string())),
    }
}

fn read_footer(file: &mut File) -> Result<Footer, SSTableError> {
    let file_len = file.metadata()?.len();
    if file_len < FOOTER_SIZE {
        return Err(SSTableError::TooSmall);
    }
    file.seek(SeekFrom::Start(file_len - FOOTER_SIZE))?;
    let data_len = read_u64(file)?;
    let index_len = read_u64(file)?;
    let meta_len = read_u32(file)?;
    let magic = read_u32(file)?;
    if magic != SST_MAGIC {
        return Err(SSTableError::BadMagic);
    }
    Ok(Footer {
        data_len,
        index_len,
        meta_len,
    })
}

fn read_meta(file: &mut File, footer: &Footer) -> Result<Meta, SSTableError> {
    let meta_start = footer.data_len + footer.index_len;
    file.seek(SeekFrom::Start(meta_start))?;
    let mut reader = BufReader::new(file).take(footer.meta_len as u64);
    let min_key = read_slice(&mut reader)?;
    let max_key = read_slice(&mut reader)?;
    let key_count = read_u64(&mut reader)?;
    Ok(Meta {
        min_key,
        max_key,
        key_count,
    })
}

/// Parses the flat-naming sequence number (`<seq>.db`) out of a table
/// path, if it matches that scheme.
pub fn parse_flat_sequence(path: &Path) -> Option<u64> {
    if path.extension().and_then(|e| e.to_str()) != Some("db") {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::builder::SstWriter;
    use super::*;
    use tempfile::TempDir;

    fn build(dir: &Path, name: &str, entries: Vec<(&[u8], &[u8])>) -> SSTable {
        let path = dir.join(name);
        let owned: Vec<(Vec<u8>, Vec<u8>)> = entries
            .into_iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        let wrote = SstWriter::new(&path).build(owned).unwrap();
        assert!(wrote);
        SSTable::open(&path).unwrap()
    }

    #[test]
    fn basic_get_hits_and_misses() {
        let dir = TempDir::new().unwrap();
        let table = build(
            dir.path(),
            "1.db",
            vec![(b"aa1", b"test2"), (b"ab1", b"test3"), (b"ca1", b"test1")],
        );
        assert_eq!(table.get(b"aa1").unwrap(), Some(b"test2".to_vec()));
        assert_eq!(table.get(b"ac1").unwrap(), None);
    }

    #[test]
    fn index_miss_on_key_between_existing_keys() {
        let dir = TempDir::new().unwrap();
        let table = build(
            dir.path(),
            "1.db",
            vec![(b"aa1", b"v1"), (b"ab1", b"v2"), (b"ca1", b"v3")],
        );
        assert_eq!(table.get(b"ab0").unwrap(), None);
    }

    #[test]
    fn out_of_range_key_never_opens_the_file() {
        let dir = TempDir::new().unwrap();
        let table = build(dir.path(), "1.db", vec![(b"a", b"1"), (b"m", b"2")]);
        assert!(!table.could_contain(b"n"));
        assert_eq!(table.get(b"n").unwrap(), None);
    }

    #[test]
    fn footer_round_trips_exact_lengths() {
        let dir = TempDir::new().unwrap();
        let table = build(dir.path(), "1.db", vec![(b"a", b"1"), (b"b", b"22")]);
        assert_eq!(table.meta.min_key, b"a");
        assert_eq!(table.meta.max_key, b"b");
        assert_eq!(table.meta.key_count, 2);
    }

    #[test]
    fn empty_input_materializes_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.db");
        let wrote = SstWriter::new(&path)
            .build(Vec::<(Vec<u8>, Vec<u8>)>::new())
            .unwrap();
        assert!(!wrote);
        assert!(!path.exists());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.db");
        std::fs::write(&path, vec![0u8; FOOTER_SIZE as usize]).unwrap();
        assert!(matches!(SSTable::open(&path), Err(SSTableError::BadMagic)));
    }

    #[test]
    fn parses_flat_sequence_numbers() {
        assert_eq!(parse_flat_sequence(Path::new("/tmp/7.db")), Some(7));
        assert_eq!(parse_flat_sequence(Path::new("/tmp/7.log")), None);
    }
}
