//! Fixed-width integer and length-prefixed byte-slice helpers over a
//! generic [`Read`]/[`Write`].
//!
//! These mirror the original engine's `helpers/io_helper.go`: every
//! multi-byte integer is little-endian, and a byte slice is framed as a
//! `u32` length prefix followed by the raw bytes. The WAL and SSTable
//! writers/readers build their exact on-disk formats out of these
//! primitives rather than a generic buffer-based serialization layer,
//! since both formats are streamed through a [`std::fs::File`] a few
//! fields at a time rather than assembled in memory first.

use std::io::{self, Read, Write};

/// Maximum length accepted by [`read_slice`] for a single length-prefixed
/// byte string. Guards against a corrupt length field causing an
/// unreasonable allocation.
pub const MAX_SLICE_LEN: u32 = 256 * 1024 * 1024;

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Write `data` as `(u32 len, bytes)`.
pub fn write_slice<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    write_u32(w, data.len() as u32)?;
    w.write_all(data)
}

/// Read a `(u32 len, bytes)` slice written by [`write_slice`].
pub fn read_slice<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(r)?;
    if len > MAX_SLICE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("slice length {len} exceeds maximum {MAX_SLICE_LEN}"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
