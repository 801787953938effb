use super::ReadAt;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Local file reader with random access support.
///
/// The handle lives behind a mutex so every seek+read pair runs as a
/// critical section; reads happen on tokio's blocking pool.
pub struct LocalFileReader {
    file: Arc<Mutex<File>>,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            size,
        })
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if len == 0 || offset >= self.size {
            return Ok(Vec::new());
        }

        // Never reserve more than the file can still deliver
        let capacity = usize::try_from(self.size - offset).map_or(len, |rest| rest.min(len));
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
            let mut file = file.lock();
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = Vec::with_capacity(capacity);
            (&mut *file).take(len as u64).read_to_end(&mut buf)?;
            Ok(buf)
        })
        .await
        .map_err(io::Error::other)?
    }

    fn size(&self) -> u64 {
        self.size
    }
}
