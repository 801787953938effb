use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Extension given to every durable-tier file
pub const FILE_EXTENSION: &str = "img";

/// Durable tier: one file per key, named by the SHA-256 of the key.
///
/// There is no index; a key is cached iff its file exists. Writes go to a
/// temporary file in the same directory and are renamed into place, so a
/// reader sees the old file, no file, or the complete new one.
pub struct DiskTier {
    root: PathBuf,
}

/// Lowercase hex SHA-256 of a cache key
pub fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

impl DiskTier {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{FILE_EXTENSION}", key_digest(key)))
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    pub async fn read(&self, key: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path_for(key)).await
    }

    pub async fn write(&self, key: &str, data: bytes::Bytes) -> io::Result<()> {
        let root = self.root.clone();
        let target = self.path_for(key);
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&root)?;
            tmp.write_all(&data)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(io::Error::other)?
    }

    pub async fn remove(&self, key: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Delete the whole directory, then recreate it empty.
    pub async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        self.ensure_root().await
    }

    /// Cached files with their size and modification time
    async fn files(&self) -> io::Result<Vec<(PathBuf, u64, SystemTime)>> {
        let mut files = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((path, meta.len(), modified));
            }
        }
        Ok(files)
    }

    /// Total bytes held on disk
    pub async fn usage(&self) -> io::Result<u64> {
        Ok(self.files().await?.iter().map(|(_, len, _)| len).sum())
    }

    /// Delete least-recently-written files until usage is at most `limit`.
    ///
    /// Returns the number of files removed.
    pub async fn trim_to(&self, limit: u64) -> io::Result<usize> {
        let mut files = self.files().await?;
        let mut usage: u64 = files.iter().map(|(_, len, _)| len).sum();
        files.sort_by_key(|(_, _, modified)| *modified);

        let mut removed = 0;
        for (path, len, _) in files {
            if usage <= limit {
                break;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                // Raced with a concurrent remove or clear
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            usage = usage.saturating_sub(len);
            removed += 1;
        }
        debug!(removed, usage, limit, "durable tier trimmed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_digest_is_fixed_width_hex() {
        let digest = key_digest("chapter-12:3");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(digest, key_digest("chapter-12:3"));
        assert_ne!(digest, key_digest("chapter-12:4"));
        // sha256("abc")
        assert_eq!(
            key_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_path_never_contains_raw_key() {
        let tier = DiskTier::new(PathBuf::from("/cache"));
        let path = tier.path_for("../../etc/passwd");
        assert_eq!(path.parent(), Some(Path::new("/cache")));
        assert!(path.to_str().unwrap().ends_with(".img"));
    }

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::new(dir.path().join("pages"));
        tier.ensure_root().await.unwrap();

        tier.write("k", bytes::Bytes::from_static(b"first")).await.unwrap();
        tier.write("k", bytes::Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(tier.read("k").await.unwrap(), b"second");

        tier.remove("k").await.unwrap();
        tier.remove("k").await.unwrap();
        assert!(tier.read("k").await.is_err());
    }

    #[tokio::test]
    async fn test_clear_recreates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::new(dir.path().join("pages"));
        tier.ensure_root().await.unwrap();
        tier.write("k", bytes::Bytes::from_static(b"x")).await.unwrap();

        tier.clear().await.unwrap();
        assert!(tier.root().is_dir());
        assert_eq!(tier.usage().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trim_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::new(dir.path().to_path_buf());

        tier.write("old", bytes::Bytes::from(vec![0u8; 100])).await.unwrap();
        let old = std::fs::File::options().write(true).open(tier.path_for("old")).unwrap();
        old.set_modified(SystemTime::UNIX_EPOCH).unwrap();
        tier.write("new", bytes::Bytes::from(vec![0u8; 100])).await.unwrap();

        assert_eq!(tier.usage().await.unwrap(), 200);
        assert_eq!(tier.trim_to(150).await.unwrap(), 1);
        assert!(tier.read("old").await.is_err());
        assert!(tier.read("new").await.is_ok());
        assert_eq!(tier.trim_to(150).await.unwrap(), 0);
    }
}
