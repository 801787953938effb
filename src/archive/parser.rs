//! Low-level archive parser.
//!
//! This module handles the binary parsing of the archive structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! Archives are designed to be read from the end:
//! 1. Find the trailer record in the file's tail
//! 2. Read the directory it points at to get metadata for all entries
//! 3. For extraction, read each entry's local header to find its payload
//!
//! All multi-byte fields are little-endian.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum archive comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for a trailer followed by a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level archive parser.
///
/// Generic over the reader type so the same code serves local files and
/// archives already held in memory.
///
/// ## Example
///
/// ```ignore
/// let parser = ArchiveParser::new(reader);
/// let entries = parser.list_entries().await?;
/// for entry in entries {
///     let offset = parser.data_offset(&entry).await?;
///     // Read the payload from offset...
/// }
/// ```
pub struct ArchiveParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ArchiveParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the trailer record.
    ///
    /// The trailer may be followed by a comment of up to 65535 bytes, so the
    /// last `min(size, 65557)` bytes are searched backwards for its signature.
    ///
    /// # Returns
    ///
    /// A tuple of (trailer record, offset of the trailer in the file).
    ///
    /// # Errors
    ///
    /// [`Error::CorruptArchive`] if no trailer signature exists in the window.
    pub async fn find_trailer(&self) -> Result<(Trailer, u64)> {
        if self.size < Trailer::SIZE as u64 {
            return Err(Error::corrupt("file too small to hold a trailer record"));
        }

        // Common case: no comment, the trailer is the last 22 bytes.
        let offset = self.size - Trailer::SIZE as u64;
        let buf = self.reader.read_at(offset, Trailer::SIZE).await?;
        if buf.len() == Trailer::SIZE
            && &buf[0..4] == Trailer::SIGNATURE
            && &buf[20..22] == b"\x00\x00"
        {
            return Ok((Trailer::from_bytes(&buf)?, offset));
        }

        let search_size = (MAX_COMMENT_SIZE + Trailer::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;
        let buf = self
            .reader
            .read_at(search_start, search_size as usize)
            .await?;

        match locate_trailer(&buf) {
            Some(i) => {
                let trailer = Trailer::from_bytes(&buf[i..i + Trailer::SIZE])?;
                Ok((trailer, search_start + i as u64))
            }
            None => Err(Error::corrupt("no trailer record found")),
        }
    }

    /// List every entry recorded in the archive directory, in directory order.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptArchive`] if the trailer is missing or points past itself.
    /// A directory that ends early yields the entries parsed so far.
    pub async fn list_entries(&self) -> Result<Vec<ArchiveEntry>> {
        let (trailer, trailer_offset) = self.find_trailer().await?;

        let cd_offset = trailer.cd_offset as u64;
        if cd_offset > trailer_offset {
            return Err(Error::corrupt(format!(
                "directory offset {cd_offset} lies beyond the trailer at {trailer_offset}"
            )));
        }

        // Walk by record count; the declared directory size is not trusted,
        // so everything up to the trailer is read in one request
        let cd_len = trailer_offset - cd_offset;
        if cd_len != trailer.cd_size as u64 {
            debug!(
                declared = trailer.cd_size,
                available = cd_len,
                "directory size disagrees with trailer position"
            );
        }
        let cd_data = self.reader.read_at(cd_offset, cd_len as usize).await?;

        let entries = parse_directory(&cd_data, trailer.total_entries as usize);
        if entries.len() < trailer.total_entries as usize {
            debug!(
                declared = trailer.total_entries,
                parsed = entries.len(),
                "directory ended early"
            );
        }
        debug!(
            entries = entries.len(),
            cd_offset, trailer_offset, "archive directory parsed"
        );

        Ok(entries)
    }

    /// Get the payload offset for an entry.
    ///
    /// The local header's name and extra field lengths may differ from the
    /// directory record, so the header itself is read to find where the
    /// payload begins.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptArchive`] if the header lies outside the file, is short,
    /// or carries the wrong signature.
    pub async fn data_offset(&self, entry: &ArchiveEntry) -> Result<u64> {
        let lfh_offset = entry.local_header_offset as u64;
        if lfh_offset >= self.size {
            return Err(Error::corrupt(format!(
                "local header offset {lfh_offset} of {} is past end of file",
                entry.path
            )));
        }

        let lfh_buf = self.reader.read_at(lfh_offset, LFH_SIZE).await?;
        if lfh_buf.len() < LFH_SIZE {
            return Err(Error::corrupt(format!(
                "short local header for {}",
                entry.path
            )));
        }
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::corrupt(format!(
                "invalid local header signature for {}",
                entry.path
            )));
        }

        // Read the variable field lengths from fixed positions in the header
        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(26);

        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        Ok(lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Position of the trailer signature in `buf`, scanning backwards from the
/// last offset that still leaves room for a whole trailer record.
fn locate_trailer(buf: &[u8]) -> Option<usize> {
    if buf.len() < Trailer::SIZE {
        return None;
    }
    (0..=buf.len() - Trailer::SIZE)
        .rev()
        .find(|&i| &buf[i..i + 4] == Trailer::SIGNATURE)
}

/// Walk up to `total_entries` directory records.
///
/// Stops without error at the first record that is truncated or does not
/// carry the directory signature.
fn parse_directory(data: &[u8], total_entries: usize) -> Vec<ArchiveEntry> {
    let mut entries = Vec::with_capacity(total_entries);
    let mut pos = 0usize;

    for _ in 0..total_entries {
        if pos + CDFH_SIZE > data.len() || &data[pos..pos + 4] != CDFH_SIGNATURE {
            break;
        }
        let Some((entry, record_len)) = parse_record(&data[pos..]) else {
            break;
        };
        entries.push(entry);
        pos += record_len;
    }

    entries
}

/// Parse one directory record, returning the entry and the record's full
/// length (fixed part, name, extra field and comment).
fn parse_record(data: &[u8]) -> Option<(ArchiveEntry, usize)> {
    let mut cursor = Cursor::new(&data[4..CDFH_SIZE]);

    let _version_made_by = cursor.read_u16::<LittleEndian>().ok()?;
    let _version_needed = cursor.read_u16::<LittleEndian>().ok()?;
    let _flags = cursor.read_u16::<LittleEndian>().ok()?;
    let compression_method = cursor.read_u16::<LittleEndian>().ok()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>().ok()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>().ok()?;
    let crc32 = cursor.read_u32::<LittleEndian>().ok()?;
    let compressed_size = cursor.read_u32::<LittleEndian>().ok()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>().ok()?;
    let file_name_length = cursor.read_u16::<LittleEndian>().ok()? as usize;
    let extra_field_length = cursor.read_u16::<LittleEndian>().ok()? as usize;
    let file_comment_length = cursor.read_u16::<LittleEndian>().ok()? as usize;
    let _disk_number_start = cursor.read_u16::<LittleEndian>().ok()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>().ok()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>().ok()?;
    let local_header_offset = cursor.read_u32::<LittleEndian>().ok()?;

    let name_end = CDFH_SIZE + file_name_length;
    let name_bytes = data.get(CDFH_SIZE..name_end)?;
    // A name that is not UTF-8 becomes empty instead of failing the walk
    let path = String::from_utf8(name_bytes.to_vec()).unwrap_or_default();
    let is_directory = path.ends_with('/');

    let entry = ArchiveEntry {
        path,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        local_header_offset,
        last_mod_time,
        last_mod_date,
        is_directory,
    };

    Some((entry, name_end + extra_field_length + file_comment_length))
}
