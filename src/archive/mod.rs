//! Comic archive parsing and page extraction.
//!
//! Comic archives (`.cbz`) are ZIP containers whose entries are page images,
//! each either stored verbatim or deflate-compressed.
//!
//! ## Architecture
//!
//! - [`structures`]: records of the on-disk format (trailer, directory entries)
//! - [`parser`]: low-level parsing of those records from raw bytes
//! - [`pages`]: which entries are pages, and in what order
//! - [`format`]: image format sniffing and the validation hook
//! - [`reader`]: [`ComicArchive`], the high-level handle used by callers
//! - [`thumbnail`]: downscaled JPEG previews of pages
//!
//! ## Format Overview
//!
//! An archive consists of:
//! 1. Local file headers, each followed by its entry's payload
//! 2. A directory with one record per entry
//! 3. A trailer record at the end, optionally followed by a comment
//!
//! The trailer is located first (from the end of the file), then the
//! directory, which lists every entry without touching any payload.
//!
//! ## Limitations
//!
//! - Only STORED and DEFLATE payloads
//! - No ZIP64, encryption or multi-disk archives
//! - Reads archives, never writes them

mod format;
mod pages;
mod parser;
mod reader;
mod structures;
mod thumbnail;

pub use format::{ImageFormat, ImageValidator, MagicBytesValidator, NoValidation};
pub use pages::{IMAGE_EXTENSIONS, is_image_file, is_page_path, list_folder_pages, page_set};
pub use parser::ArchiveParser;
pub use reader::ComicArchive;
pub use structures::*;
pub use thumbnail::{
    DEFAULT_THUMBNAIL_SIZE, THUMBNAIL_QUALITY, make_thumbnail, make_thumbnail_blocking,
};
