mod local;
mod memory;

pub use local::LocalFileReader;
pub use memory::MemoryReader;

use async_trait::async_trait;
use std::io;

/// Trait for random access reading from an archive source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read up to `len` bytes starting at `offset`.
    ///
    /// The returned buffer is shorter than `len` only when the source ends
    /// first. Each call is one seek+read unit; implementations must not let
    /// concurrent calls interleave.
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}
