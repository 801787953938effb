use super::ReadAt;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;

/// Reader over an archive that is already held in memory
/// (for example one downloaded whole by the remote collaborator).
#[derive(Clone)]
pub struct MemoryReader {
    data: Bytes,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ReadAt for MemoryReader {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let size = self.data.len() as u64;
        if offset >= size {
            return Ok(Vec::new());
        }
        let start = offset as usize;
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
