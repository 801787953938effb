//! Page set selection: which entries count as pages, and in what order.
//!
//! Reading order is lexicographic path order. Archives do not record an
//! intended reading order and their directory order is arbitrary, so the
//! sorted file names stand in for it.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::structures::ArchiveEntry;

/// Image extensions recognised as pages (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff"];

/// Path prefixes of platform metadata that never hold pages
const NON_CONTENT_PREFIXES: &[&str] = &["__MACOSX"];

/// Check whether a name has a recognised image extension.
pub fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Whether an archive path is a page: an image outside metadata folders.
pub fn is_page_path(path: &str) -> bool {
    is_image_file(path)
        && !NON_CONTENT_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
}

/// Filter `entries` down to pages and sort them by path.
pub fn page_set(entries: Vec<ArchiveEntry>) -> Vec<ArchiveEntry> {
    let mut pages: Vec<_> = entries
        .into_iter()
        .filter(|e| !e.is_directory && is_page_path(&e.path))
        .collect();
    pages.sort_by(|a, b| a.path.cmp(&b.path));
    pages
}

/// List the image files directly inside `dir`, sorted by file name.
pub async fn list_folder_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|source| Error::CannotOpen {
            path: dir.to_path_buf(),
            source,
        })?;

    let mut pages = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_str().is_some_and(is_image_file) {
            pages.push(entry.path());
        }
    }
    pages.sort();
    Ok(pages)
}
