use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

/// Compression methods an archive entry can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Trailer (End of Central Directory) record - 22 bytes plus comment
pub struct Trailer {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl Trailer {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid trailer record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// Directory record (Central Directory File Header) - 46 bytes fixed part
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes fixed part
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// One file recorded in the archive directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub crc32: u32,
    pub local_header_offset: u32,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl ArchiveEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_from_bytes() {
        let mut data = vec![0u8; Trailer::SIZE];
        data[0..4].copy_from_slice(Trailer::SIGNATURE);
        data[10..12].copy_from_slice(&3u16.to_le_bytes());
        data[12..16].copy_from_slice(&138u32.to_le_bytes());
        data[16..20].copy_from_slice(&4096u32.to_le_bytes());

        let trailer = Trailer::from_bytes(&data).unwrap();
        assert_eq!(trailer.total_entries, 3);
        assert_eq!(trailer.cd_size, 138);
        assert_eq!(trailer.cd_offset, 4096);
        assert_eq!(trailer.comment_len, 0);
    }

    #[test]
    fn test_trailer_rejects_short_or_unsigned_record() {
        assert!(matches!(
            Trailer::from_bytes(&[0u8; 10]),
            Err(Error::CorruptArchive(_))
        ));
        assert!(matches!(
            Trailer::from_bytes(&[0u8; Trailer::SIZE]),
            Err(Error::CorruptArchive(_))
        ));
    }

    #[test]
    fn test_compression_method_codes() {
        assert_eq!(CompressionMethod::from_u16(0), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::from_u16(12), CompressionMethod::Unknown(12));
        assert_eq!(CompressionMethod::Unknown(99).as_u16(), 99);
    }

    #[test]
    fn test_dos_timestamp_decoding() {
        let entry = ArchiveEntry {
            path: "001.jpg".into(),
            compression_method: CompressionMethod::Stored,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            local_header_offset: 0,
            // 2024-03-15 13:45:30
            last_mod_date: ((2024 - 1980) << 9) | (3 << 5) | 15,
            last_mod_time: (13 << 11) | (45 << 5) | 15,
            is_directory: false,
        };
        assert_eq!(entry.mod_date(), (2024, 3, 15));
        assert_eq!(entry.mod_time(), (13, 45, 30));
    }
}
