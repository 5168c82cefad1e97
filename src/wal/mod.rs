//! Write-ahead log: fixed-size block framing, segment lifecycle, and
//! crash recovery.
//!
//! A WAL segment is a sequence of fixed-size blocks (default 32 KiB).
//! Each block holds one or more physical records, each with a 7-byte
//! header (`u32 crc | u16 payload_size | u8 block_type`) protecting a
//! payload fragment. A logical record — `(key, value)` — may span
//! several physical records across block boundaries; [`WalWriter`]
//! frames it on the way in and [`WalReader`] reassembles it on the way
//! out. [`WalManager`] owns one active segment at a time and drives
//! recovery of any segments left behind by an earlier, uncleanly
//! terminated process.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default WAL block size, per the on-disk format (§6 of the spec).
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

/// `u32 crc | u16 payload_size | u8 block_type`.
const HEADER_SIZE: usize = 7;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL block checksum mismatch")]
    ChecksumMismatch,
    #[error("WAL logical record truncated")]
    Truncated,
    #[error("corrupt WAL block: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl BlockType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(BlockType::Full),
            2 => Some(BlockType::First),
            3 => Some(BlockType::Middle),
            4 => Some(BlockType::Last),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WalWriter
// ------------------------------------------------------------------------------------------------

/// Frames logical `(key, value)` records into fixed-size WAL blocks.
pub struct WalWriter {
    file: File,
    block_size: usize,
    pos_in_block: usize,
    flush_on_write: bool,
    fsync_on_write: bool,
}

impl WalWriter {
    pub fn create(
        path: &Path,
        block_size: usize,
        flush_on_write: bool,
        fsync_on_write: bool,
    ) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            block_size,
            pos_in_block: 0,
            flush_on_write,
            fsync_on_write,
        })
    }

    /// Appends one logical `(key, value)` record.
    pub fn write_log(&mut self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        let mut payload = Vec::with_capacity(8 + key.len() + value.len());
        payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
        payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
        payload.extend_from_slice(key);
        payload.extend_from_slice(value);
        self.write_framed(&payload)?;
        if self.flush_on_write {
            self.file.flush()?;
        }
        if self.fsync_on_write {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn write_framed(&mut self, payload: &[u8]) -> Result<(), WalError> {
        let mut remaining = payload;
        let mut first = true;
        loop {
            let space_left = self.block_size - self.pos_in_block;
            if space_left < HEADER_SIZE + 1 && !(first && remaining.is_empty()) {
                let pad = vec![0u8; space_left];
                self.file.write_all(&pad)?;
                self.pos_in_block = 0;
                continue;
            }
            let avail_payload = space_left.saturating_sub(HEADER_SIZE);
            let take = remaining.len().min(avail_payload);
            let is_last_chunk = take == remaining.len();
            let block_type = match (first, is_last_chunk) {
                (true, true) => BlockType::Full,
                (true, false) => BlockType::First,
                (false, true) => BlockType::Last,
                (false, false) => BlockType::Middle,
            };
            let chunk = &remaining[..take];
            self.write_physical(block_type, chunk)?;
            remaining = &remaining[take..];
            first = false;
            if is_last_chunk {
                break;
            }
        }
        Ok(())
    }

    fn write_physical(&mut self, block_type: BlockType, chunk: &[u8]) -> Result<(), WalError> {
        let type_byte = block_type as u8;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(chunk);
        let crc = hasher.finalize();

        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&(chunk.len() as u16).to_le_bytes())?;
        self.file.write_all(&[type_byte])?;
        self.file.write_all(chunk)?;
        self.pos_in_block += HEADER_SIZE + chunk.len();
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// WalReader
// ------------------------------------------------------------------------------------------------

/// Reassembles logical `(key, value)` records from a block stream,
/// stopping cleanly at the first corruption or truncation.
pub struct WalReader<R> {
    reader: R,
    block_size: usize,
    pos_in_block: usize,
}

impl<R: Read> WalReader<R> {
    pub fn new(reader: R, block_size: usize) -> Self {
        Self {
            reader,
            block_size,
            pos_in_block: 0,
        }
    }

    fn read_block(&mut self) -> Result<Option<(BlockType, Vec<u8>)>, WalError> {
        let space_left = self.block_size - self.pos_in_block;
        if space_left < HEADER_SIZE + 1 {
            let mut pad = vec![0u8; space_left];
            if let Err(e) = self.reader.read_exact(&mut pad) {
                return if e.kind() == io::ErrorKind::UnexpectedEof {
                    Ok(None)
                } else {
                    Err(e.into())
                };
            }
            self.pos_in_block = 0;
        }

        let mut header = [0u8; HEADER_SIZE];
        if let Err(e) = self.reader.read_exact(&mut header) {
            return if e.kind() == io::ErrorKind::UnexpectedEof {
                Ok(None)
            } else {
                Err(e.into())
            };
        }

        let crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let payload_size = u16::from_le_bytes(header[4..6].try_into().unwrap()) as usize;
        let block_type = BlockType::from_u8(header[6])
            .ok_or_else(|| WalError::Corrupt(format!("invalid block type byte {}", header[6])))?;

        let mut payload = vec![0u8; payload_size];
        if let Err(e) = self.reader.read_exact(&mut payload) {
            return if e.kind() == io::ErrorKind::UnexpectedEof {
                Err(WalError::Truncated)
            } else {
                Err(e.into())
            };
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != crc {
            return Err(WalError::ChecksumMismatch);
        }

        self.pos_in_block += HEADER_SIZE + payload_size;
        Ok(Some((block_type, payload)))
    }

    /// Reads and reassembles the next logical record. Returns `Ok(None)`
    /// at a clean end of stream (no partial record pending).
    pub fn read_log(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, WalError> {
        let mut acc = Vec::new();
        loop {
            match self.read_block()? {
                None => {
                    if acc.is_empty() {
                        return Ok(None);
                    }
                    return Err(WalError::Truncated);
                }
                Some((block_type, payload)) => {
                    acc.extend_from_slice(&payload);
                    match block_type {
                        BlockType::Full | BlockType::Last => break,
                        BlockType::First | BlockType::Middle => continue,
                    }
                }
            }
        }

        if acc.len() < 8 {
            return Err(WalError::Truncated);
        }
        let key_len = u32::from_le_bytes(acc[0..4].try_into().unwrap()) as usize;
        let val_len = u32::from_le_bytes(acc[4..8].try_into().unwrap()) as usize;
        if acc.len() != 8 + key_len + val_len {
            return Err(WalError::Truncated);
        }
        let key = acc[8..8 + key_len].to_vec();
        let value = acc[8 + key_len..].to_vec();
        Ok(Some((key, value)))
    }
}

// ------------------------------------------------------------------------------------------------
// FileIterator
// ------------------------------------------------------------------------------------------------

/// Iterates `.old` WAL segments left behind by [`WalManager::recover`],
/// in ascending segment-number order. Each call to `next()` recovers
/// every record it can from one segment and then removes that segment
/// file.
pub struct FileIterator {
    segments: VecDeque<PathBuf>,
    block_size: usize,
}

impl FileIterator {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Iterator for FileIterator {
    type Item = Vec<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.segments.pop_front()?;
        let records = recover_segment(&path, self.block_size);
        if let Err(err) = fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove recovered WAL segment");
        }
        Some(records)
    }
}

fn recover_segment(path: &Path, block_size: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to open WAL segment for recovery");
            return Vec::new();
        }
    };
    let mut reader = WalReader::new(BufReader::new(file), block_size);
    let mut out = Vec::new();
    loop {
        match reader.read_log() {
            Ok(Some(record)) => out.push(record),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "stopping WAL recovery at corrupt or truncated record");
                break;
            }
        }
    }
    out
}

// ------------------------------------------------------------------------------------------------
// WalManager
// ------------------------------------------------------------------------------------------------

/// Owns the active WAL segment and drives segment creation, rollover,
/// and recovery enumeration.
pub struct WalManager {
    wal_dir: PathBuf,
    block_size: usize,
    flush_on_write: bool,
    fsync_on_write: bool,
    writer: WalWriter,
    active_seq: u64,
}

impl WalManager {
    fn segment_path(wal_dir: &Path, seq: u64) -> PathBuf {
        wal_dir.join(format!("{seq}.log"))
    }

    fn parse_seq(path: &Path) -> Option<u64> {
        path.file_stem()?.to_str()?.parse().ok()
    }

    /// Renames every existing `<n>.log` segment in `wal_dir` to
    /// `<n>.log.old` and returns a [`FileIterator`] over them in
    /// ascending order. Must be called before [`WalManager::init`].
    pub fn recover(wal_dir: &Path, block_size: usize) -> Result<FileIterator, WalError> {
        fs::create_dir_all(wal_dir)?;
        let mut segments: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(wal_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                if let Some(seq) = Self::parse_seq(&path) {
                    segments.push((seq, path));
                }
            }
        }
        segments.sort_by_key(|(seq, _)| *seq);

        let mut renamed = VecDeque::with_capacity(segments.len());
        for (_, path) in segments {
            let old_path = path.with_extension("log.old");
            fs::rename(&path, &old_path)?;
            renamed.push_back(old_path);
        }
        Ok(FileIterator {
            segments: renamed,
            block_size,
        })
    }

    /// Opens a fresh active segment, numbered one past the highest
    /// existing `<n>.log` segment (normally none, since `recover` has
    /// already renamed every pre-existing one to `.old`).
    pub fn init(
        wal_dir: &Path,
        block_size: usize,
        flush_on_write: bool,
        fsync_on_write: bool,
    ) -> Result<Self, WalError> {
        fs::create_dir_all(wal_dir)?;
        let mut highest = 0u64;
        for entry in fs::read_dir(wal_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                if let Some(seq) = Self::parse_seq(&path) {
                    highest = highest.max(seq);
                }
            }
        }
        let active_seq = highest + 1;
        let path = Self::segment_path(wal_dir, active_seq);
        let writer = WalWriter::create(&path, block_size, flush_on_write, fsync_on_write)?;
        Ok(Self {
            wal_dir: wal_dir.to_path_buf(),
            block_size,
            flush_on_write,
            fsync_on_write,
            writer,
            active_seq,
        })
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        self.writer.write_log(key, value)
    }

    /// Closes the current active segment and opens a fresh one, one
    /// sequence number higher. Returns the path of the segment just
    /// retired, which the caller removes once its data is durably
    /// captured elsewhere.
    pub fn switch_file(&mut self) -> Result<PathBuf, WalError> {
        self.writer.close()?;
        let retired = Self::segment_path(&self.wal_dir, self.active_seq);
        self.active_seq += 1;
        let new_path = Self::segment_path(&self.wal_dir, self.active_seq);
        self.writer =
            WalWriter::create(&new_path, self.block_size, self.flush_on_write, self.fsync_on_write)?;
        Ok(retired)
    }

    pub fn close(&mut self) -> Result<(), WalError> {
        self.writer.close()
    }
}
