//! On-disk container layout.
//!
//! ```text
//! [block_count: i32 LE]
//! [len: i32 LE][len bytes of codec output]   ← one record per block, in index order
//! ...
//! ```
//!
//! There is no magic, codec id or checksum; the reader must know which codec
//! produced the records.

use std::io::{self, Read, Write};

use crate::error::{ProtocolError, Result};

/// Size of the block-count header in bytes.
pub const HEADER_LEN: usize = 4;

/// Size of the length prefix in front of every record.
pub const LENGTH_PREFIX: usize = 4;

pub fn write_header<W: Write + ?Sized>(w: &mut W, block_count: u64) -> Result<()> {
    let count =
        i32::try_from(block_count).map_err(|_| ProtocolError::TooManyBlocks(block_count))?;
    w.write_all(&count.to_le_bytes())?;
    Ok(())
}

pub fn read_header<R: Read + ?Sized>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; HEADER_LEN];
    let n = read_up_to(r, &mut buf)?;
    if n < HEADER_LEN {
        return Err(ProtocolError::TruncatedHeader(n).into());
    }
    let count = i32::from_le_bytes(buf);
    if count < 0 {
        return Err(ProtocolError::NegativeCount(count).into());
    }
    Ok(count as u64)
}

pub fn write_record<W: Write + ?Sized>(w: &mut W, payload: &[u8]) -> Result<()> {
    let len =
        i32::try_from(payload.len()).map_err(|_| ProtocolError::RecordTooLarge(payload.len()))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Read the next record.
///
/// Returns `Ok(None)` only when the stream is exhausted exactly at a record
/// boundary. A zero-length record is `Ok(Some(vec![]))`, never end of stream.
pub fn read_record<R: Read + ?Sized>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; LENGTH_PREFIX];
    let n = read_up_to(r, &mut len_buf)?;
    if n == 0 {
        return Ok(None);
    }
    if n < LENGTH_PREFIX {
        return Err(ProtocolError::TruncatedLength(n).into());
    }
    let len = i32::from_le_bytes(len_buf);
    if len < 0 {
        return Err(ProtocolError::NegativeLength(len).into());
    }
    let declared = len as usize;

    // Grow with the data actually present so a corrupt length cannot force a
    // multi-gigabyte allocation up front.
    let mut payload = Vec::new();
    Read::take(&mut *r, declared as u64).read_to_end(&mut payload)?;
    if payload.len() < declared {
        return Err(ProtocolError::TruncatedRecord {
            declared,
            available: payload.len(),
        }
        .into());
    }
    Ok(Some(payload))
}

/// Fill as much of `buf` as the stream allows, returning the byte count.
///
/// Unlike `read_exact`, running out of input is not an error.
pub fn read_up_to<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
