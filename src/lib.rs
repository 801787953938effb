//! # cbzpage
//!
//! A comic archive page reader with a tiered image cache.
//!
//! This library lists and extracts the page images of comic archives
//! (`.cbz`, i.e. ZIP containers of images) with a hand-written parser, and
//! keeps decoded pages in a two-tier cache: a bounded in-memory LRU in front
//! of an on-disk directory, so navigating back and forth does not re-read
//! the archive.
//!
//! ## Features
//!
//! - Page listing in lexicographic path order, skipping non-image entries
//!   and `__MACOSX` metadata
//! - STORED and DEFLATE entries, with size and CRC-32 verification
//! - Memory tier bounded by entry count and total bytes; durable tier
//!   addressed by the SHA-256 of each key
//! - Chapters from archives, image folders or a remote collaborator
//! - Background prefetch that can be abandoned at any time
//! - JPEG thumbnails of pages, cached next to the pages themselves
//!
//! ## Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use cbzpage::{CacheConfig, ChapterSource, ImageCache, PageRef, PageService};
//!
//! #[tokio::main]
//! async fn main() -> cbzpage::Result<()> {
//!     let cache = Arc::new(ImageCache::open(CacheConfig::default()).await?);
//!     let service = PageService::new(cache);
//!
//!     let chapter = ChapterSource::Archive(PathBuf::from("chapter-01.cbz"));
//!     for (i, name) in service.list_pages(&chapter).await?.iter().enumerate() {
//!         println!("{i}: {name}");
//!     }
//!
//!     let first = service.get_page_image(&PageRef::new(chapter, 0)).await?;
//!     println!("first page is {} bytes", first.len());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cache;
pub mod cli;
pub mod error;
pub mod io;
pub mod service;

pub use archive::{ArchiveEntry, ComicArchive, CompressionMethod, ImageFormat, ImageValidator};
pub use cache::{CacheConfig, ImageCache};
pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use service::{ChapterSource, PageRef, PageService, Prefetch, RemotePages};
