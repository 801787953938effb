use flate2::read::DeflateDecoder;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::{LocalFileReader, ReadAt};

use super::format::ImageValidator;
use super::pages::page_set;
use super::parser::ArchiveParser;
use super::structures::{ArchiveEntry, CompressionMethod};
use super::thumbnail::make_thumbnail_blocking;

/// An open comic archive
pub struct ComicArchive<R: ReadAt> {
    parser: ArchiveParser<R>,
    /// Held across an extraction's header and payload reads
    extraction: Mutex<()>,
}

impl ComicArchive<LocalFileReader> {
    /// Open an archive file for random-access reads.
    ///
    /// # Errors
    ///
    /// [`Error::CannotOpen`] if the file cannot be opened for reading.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = LocalFileReader::new(path).map_err(|source| Error::CannotOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(Arc::new(reader)))
    }
}

impl<R: ReadAt> ComicArchive<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ArchiveParser::new(reader),
            extraction: Mutex::new(()),
        }
    }

    /// All directory entries, in directory order
    pub async fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        self.parser.list_entries().await
    }

    /// Page entries sorted by path; the position in this list is the page number.
    pub async fn pages(&self) -> Result<Vec<ArchiveEntry>> {
        Ok(page_set(self.entries().await?))
    }

    /// Paths of every page, in reading order.
    ///
    /// Reading order is lexicographic path order; the archive format itself
    /// carries no page order.
    pub async fn list_pages(&self) -> Result<Vec<String>> {
        Ok(self.pages().await?.into_iter().map(|e| e.path).collect())
    }

    pub async fn page_count(&self) -> Result<usize> {
        Ok(self.pages().await?.len())
    }

    /// Extract the page whose path matches `path` exactly.
    pub async fn extract_page(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self
            .pages()
            .await?
            .into_iter()
            .find(|e| e.path == path)
            .ok_or_else(|| Error::PageNotFound(path.to_string()))?;
        self.extract_entry(&entry).await
    }

    /// Extract the page at `index` in reading order.
    pub async fn extract_page_at(&self, index: usize) -> Result<Vec<u8>> {
        let entry = self.page_at(index).await?;
        self.extract_entry(&entry).await
    }

    /// Extract the page at `index` and run `validator` over the bytes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidImageData`] when the validator rejects the bytes, on
    /// top of every error [`extract_page_at`](Self::extract_page_at) returns.
    pub async fn extract_image_at(
        &self,
        index: usize,
        validator: &dyn ImageValidator,
    ) -> Result<Vec<u8>> {
        let entry = self.page_at(index).await?;
        let data = self.extract_entry(&entry).await?;
        validator
            .validate(&data)
            .map_err(|reason| Error::InvalidImageData(format!("{}: {reason}", entry.path)))?;
        Ok(data)
    }

    /// JPEG thumbnail of the page at `index`, fitting inside `max_width` x
    /// `max_height`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidImageData`] when the page does not decode as an image,
    /// on top of every error [`extract_page_at`](Self::extract_page_at) returns.
    pub async fn thumbnail_at(
        &self,
        index: usize,
        max_width: u32,
        max_height: u32,
    ) -> Result<Vec<u8>> {
        let data = self.extract_page_at(index).await?;
        make_thumbnail_blocking(data, max_width, max_height).await
    }

    /// Write every page under `dest`, keeping the archive's directory layout.
    ///
    /// Returns the written files in reading order. An entry path that would
    /// land outside `dest` fails the whole unpack with
    /// [`Error::CorruptArchive`] before anything is written.
    pub async fn extract_pages_to(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        let pages = self.pages().await?;
        let targets = pages
            .iter()
            .map(|entry| confined_path(dest, &entry.path))
            .collect::<Result<Vec<_>>>()?;

        for (entry, target) in pages.iter().zip(&targets) {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            let data = self.extract_entry(entry).await?;
            fs::write(target, &data).await?;
        }
        debug!(dest = %dest.display(), pages = targets.len(), "pages unpacked");
        Ok(targets)
    }

    async fn page_at(&self, index: usize) -> Result<ArchiveEntry> {
        let mut pages = self.pages().await?;
        let count = pages.len();
        if index >= count {
            return Err(Error::PageNotFound(format!(
                "index {index} out of range (page count {count})"
            )));
        }
        Ok(pages.swap_remove(index))
    }

    /// Extract an entry's decoded bytes.
    pub async fn extract_entry(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(Error::UnsupportedCompression(method));
        }

        let raw = {
            let _guard = self.extraction.lock().await;
            let data_offset = self.parser.data_offset(entry).await?;
            let end = data_offset + entry.compressed_size as u64;
            if end > self.parser.reader().size() {
                return Err(Error::corrupt(format!(
                    "payload of {} runs past end of archive ({end} > {})",
                    entry.path,
                    self.parser.reader().size()
                )));
            }
            let len = entry.compressed_size as usize;
            let raw = self.parser.reader().read_at(data_offset, len).await?;
            if raw.len() != len {
                return Err(Error::corrupt(format!(
                    "payload of {} truncated: expected {len} bytes, got {}",
                    entry.path,
                    raw.len()
                )));
            }
            raw
        };

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => inflate(&raw, entry)?,
            CompressionMethod::Unknown(method) => return Err(Error::UnsupportedCompression(method)),
        };

        verify(&data, entry)?;
        debug!(
            path = %entry.path,
            method = entry.compression_method.as_u16(),
            bytes = data.len(),
            "entry extracted"
        );
        Ok(data)
    }
}

/// `dest` joined with an entry path made only of plain components.
fn confined_path(dest: &Path, entry_path: &str) -> Result<PathBuf> {
    let relative = Path::new(entry_path);
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain || entry_path.contains('\\') {
        return Err(Error::corrupt(format!(
            "entry path {entry_path} escapes the destination directory"
        )));
    }
    Ok(dest.join(relative))
}

/// Up-front reservation cap for decoded output; larger entries grow as they decode
const MAX_PREALLOC: usize = 8 * 1024 * 1024;

/// Decompress a raw deflate stream (no zlib header).
fn inflate(raw: &[u8], entry: &ArchiveEntry) -> Result<Vec<u8>> {
    let expected = entry.uncompressed_size as u64;
    let mut out = Vec::with_capacity((entry.uncompressed_size as usize).min(MAX_PREALLOC));
    // One byte past the declared size is enough to detect an oversized stream
    DeflateDecoder::new(raw)
        .take(expected + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::corrupt(format!("deflate stream of {} is invalid: {e}", entry.path)))?;
    Ok(out)
}

/// Check decoded length and CRC-32 against the directory record.
fn verify(data: &[u8], entry: &ArchiveEntry) -> Result<()> {
    if data.len() as u64 != entry.uncompressed_size as u64 {
        return Err(Error::corrupt(format!(
            "{} decoded to {} bytes, directory declares {}",
            entry.path,
            data.len(),
            entry.uncompressed_size
        )));
    }

    let mut crc = flate2::Crc::new();
    crc.update(data);
    if crc.sum() != entry.crc32 {
        return Err(Error::corrupt(format!(
            "CRC mismatch for {}: expected {:08x}, got {:08x}",
            entry.path,
            entry.crc32,
            crc.sum()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(method: CompressionMethod, data: &[u8], compressed_size: u32) -> ArchiveEntry {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        ArchiveEntry {
            path: "001.png".into(),
            compression_method: method,
            compressed_size,
            uncompressed_size: data.len() as u32,
            crc32: crc.sum(),
            local_header_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            is_directory: false,
        }
    }

    #[test]
    fn test_verify_accepts_matching_payload() {
        let data = b"page bytes";
        assert!(verify(data, &entry(CompressionMethod::Stored, data, 10)).is_ok());
    }

    #[test]
    fn test_verify_rejects_crc_mismatch() {
        let mut e = entry(CompressionMethod::Stored, b"page bytes", 10);
        e.crc32 ^= 1;
        let err = verify(b"page bytes", &e).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_confined_path() {
        let dest = Path::new("/out");
        assert_eq!(
            confined_path(dest, "ch1/001.png").unwrap(),
            PathBuf::from("/out/ch1/001.png")
        );
        for bad in ["../001.png", "/etc/001.png", "a/../../001.png", "..\\001.png"] {
            assert!(
                matches!(confined_path(dest, bad), Err(Error::CorruptArchive(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_inflate_rejects_garbage() {
        let e = entry(CompressionMethod::Deflate, b"whatever", 4);
        assert!(matches!(
            inflate(&[0xFF, 0xFF, 0xFF, 0xFF], &e),
            Err(Error::CorruptArchive(_))
        ));
    }

    #[test]
    fn test_inflate_known_plaintext() {
        use flate2::Compression;
        use flate2::write::DeflateEncoder;
        use std::io::Write;

        let plain = b"known plaintext known plaintext known plaintext";
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(plain).unwrap();
        let compressed = enc.finish().unwrap();

        let e = entry(CompressionMethod::Deflate, plain, compressed.len() as u32);
        assert_eq!(inflate(&compressed, &e).unwrap(), plain);
    }

    #[test]
    fn test_inflate_does_not_trust_declared_size() {
        use flate2::Compression;
        use flate2::write::DeflateEncoder;
        use std::io::Write;

        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"tiny").unwrap();
        let compressed = enc.finish().unwrap();

        let mut e = entry(CompressionMethod::Deflate, b"tiny", compressed.len() as u32);
        e.uncompressed_size = 0xFFFF_FF00;
        let out = inflate(&compressed, &e).unwrap();
        assert_eq!(out, b"tiny");
        assert!(out.capacity() <= MAX_PREALLOC);
        assert!(verify(&out, &e).is_err());
    }
}
