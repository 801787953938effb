//! Error taxonomy shared by the archive reader, the cache and the page service.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while reading archives, folders, caches or remote pages.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive (or chapter folder) could not be opened for reading.
    #[error("cannot open {}: {source}", .path.display())]
    CannotOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A trailer, directory or local header record is missing or malformed.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// The requested page path or index is not part of the page set.
    #[error("page not found: {0}")]
    PageNotFound(String),

    /// The entry uses a compression method other than stored or deflate.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// The extracted bytes were rejected by the image validator.
    #[error("invalid image data: {0}")]
    InvalidImageData(String),

    /// Generic read/write failure.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The remote page collaborator was unreachable or answered with an error.
    #[error("remote fetch failed: {0}")]
    Remote(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptArchive(msg.into())
    }

    /// Whether re-attempting the same operation may succeed.
    ///
    /// Archive contents are static, so structural errors are never transient;
    /// only I/O and remote failures are worth a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Remote(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
