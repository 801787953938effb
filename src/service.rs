//! Page service: the interface the reader UI talks to.
//!
//! Every image request goes through the cache first and falls back to the
//! page's source (archive, image folder or remote collaborator) on a miss,
//! writing the result back into the cache.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::archive::{
    ComicArchive, DEFAULT_THUMBNAIL_SIZE, ImageValidator, MagicBytesValidator, list_folder_pages,
    make_thumbnail_blocking,
};
use crate::cache::ImageCache;
use crate::error::{Error, Result};

/// Remote collaborator serving pages and covers over the network
#[async_trait]
pub trait RemotePages: Send + Sync {
    async fn fetch_page_bytes(&self, chapter_id: &str, page_index: usize) -> Result<Vec<u8>>;

    async fn fetch_cover_bytes(&self, manga_id: &str) -> Result<Vec<u8>>;
}

/// Where a chapter's pages come from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChapterSource {
    /// A `.cbz`/`.zip` archive on disk
    Archive(PathBuf),
    /// A directory of image files
    Folder(PathBuf),
    /// A chapter hosted by the remote collaborator
    Remote { chapter_id: String },
}

impl ChapterSource {
    /// Classify a local path: archives by extension, folders by being a directory.
    pub fn detect(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(ChapterSource::Folder(path.to_path_buf()));
        }
        let is_archive = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("cbz") || e.eq_ignore_ascii_case("zip"));
        if is_archive && path.is_file() {
            return Ok(ChapterSource::Archive(path.to_path_buf()));
        }
        Err(Error::CannotOpen {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a .cbz/.zip archive or a directory",
            ),
        })
    }

    /// Stable identifier used as the first half of cache keys
    pub fn content_id(&self) -> String {
        match self {
            ChapterSource::Archive(path) | ChapterSource::Folder(path) => {
                path.display().to_string()
            }
            ChapterSource::Remote { chapter_id } => format!("remote:{chapter_id}"),
        }
    }
}

/// One page of one chapter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRef {
    pub source: ChapterSource,
    pub index: usize,
}

impl PageRef {
    pub fn new(source: ChapterSource, index: usize) -> Self {
        Self { source, index }
    }

    /// Cache key: content id and page index
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.source.content_id(), self.index)
    }

    /// Cache key of this page's thumbnail for one bounding box
    pub fn thumbnail_cache_key(&self, max_width: u32, max_height: u32) -> String {
        format!("{}:thumb:{max_width}x{max_height}", self.cache_key())
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} page {}", self.source.content_id(), self.index)
    }
}

/// Cache key for a manga cover
pub fn cover_cache_key(manga_id: &str) -> String {
    format!("cover:{manga_id}")
}

/// Cache-fronted page access for the UI layer
pub struct PageService {
    cache: Arc<ImageCache>,
    remote: Option<Arc<dyn RemotePages>>,
    validator: Arc<dyn ImageValidator>,
}

impl PageService {
    pub fn new(cache: Arc<ImageCache>) -> Self {
        Self {
            cache,
            remote: None,
            validator: Arc::new(MagicBytesValidator),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemotePages>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replace the decode check run on local pages before they are cached.
    pub fn with_validator(mut self, validator: Arc<dyn ImageValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Page identifiers of a local chapter, in reading order.
    ///
    /// Archive pages are entry paths; folder pages are file names.
    pub async fn list_pages(&self, source: &ChapterSource) -> Result<Vec<String>> {
        match source {
            ChapterSource::Archive(path) => ComicArchive::open(path)?.list_pages().await,
            ChapterSource::Folder(dir) => Ok(list_folder_pages(dir)
                .await?
                .iter()
                .filter_map(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect()),
            ChapterSource::Remote { chapter_id } => Err(Error::Remote(format!(
                "page listing for remote chapter {chapter_id} belongs to the API client"
            ))),
        }
    }

    pub async fn page_count(&self, source: &ChapterSource) -> Result<usize> {
        Ok(self.list_pages(source).await?.len())
    }

    /// Image bytes for `page`, from the cache when possible.
    pub async fn get_page_image(&self, page: &PageRef) -> Result<Bytes> {
        let key = page.cache_key();
        if let Some(data) = self.cache.get(&key).await {
            return Ok(data);
        }

        debug!(%page, "cache miss, loading from source");
        let data = Bytes::from(self.load_page(page).await?);
        self.cache.put(&key, data.clone()).await;
        Ok(data)
    }

    /// Cover image for a remote manga, from the cache when possible.
    pub async fn get_cover_image(&self, manga_id: &str) -> Result<Bytes> {
        let key = cover_cache_key(manga_id);
        if let Some(data) = self.cache.get(&key).await {
            return Ok(data);
        }

        let data = Bytes::from(self.remote()?.fetch_cover_bytes(manga_id).await?);
        self.cache.put(&key, data.clone()).await;
        Ok(data)
    }

    /// JPEG thumbnail of `page` fitting inside `max_width` x `max_height`.
    ///
    /// The full page goes through [`get_page_image`](Self::get_page_image)
    /// first, so both the page and its thumbnail end up cached.
    pub async fn get_page_thumbnail(
        &self,
        page: &PageRef,
        max_width: u32,
        max_height: u32,
    ) -> Result<Bytes> {
        let key = page.thumbnail_cache_key(max_width, max_height);
        if let Some(data) = self.cache.get(&key).await {
            return Ok(data);
        }

        let full = self.get_page_image(page).await?;
        let thumb = make_thumbnail_blocking(full.to_vec(), max_width, max_height).await?;
        let thumb = Bytes::from(thumb);
        self.cache.put(&key, thumb.clone()).await;
        Ok(thumb)
    }

    /// Cover for a local chapter: a default-size thumbnail of its first page.
    pub async fn get_chapter_cover(&self, source: &ChapterSource) -> Result<Bytes> {
        let (width, height) = DEFAULT_THUMBNAIL_SIZE;
        self.get_page_thumbnail(&PageRef::new(source.clone(), 0), width, height)
            .await
    }

    pub async fn invalidate_cache(&self, key: &str) {
        self.cache.remove(key).await;
    }

    pub async fn clear_all_cache(&self) -> Result<()> {
        self.cache.clear_all().await
    }

    /// Warm the cache for `pages` in the background.
    ///
    /// Dropping (or cancelling) the returned handle abandons whatever has
    /// not finished yet; failures are logged and otherwise ignored.
    pub fn prefetch(self: &Arc<Self>, pages: Vec<PageRef>) -> Prefetch {
        let mut tasks = JoinSet::new();
        for page in pages {
            let service = Arc::clone(self);
            tasks.spawn(async move {
                if let Err(e) = service.get_page_image(&page).await {
                    warn!(%page, error = %e, "prefetch failed");
                }
            });
        }
        Prefetch { tasks }
    }

    /// Read `page` straight from its source, validated, without touching
    /// the cache.
    pub async fn load_page(&self, page: &PageRef) -> Result<Vec<u8>> {
        match &page.source {
            ChapterSource::Archive(path) => {
                ComicArchive::open(path)?
                    .extract_image_at(page.index, self.validator.as_ref())
                    .await
            }
            ChapterSource::Folder(dir) => {
                let pages = list_folder_pages(dir).await?;
                let file = pages.get(page.index).ok_or_else(|| {
                    Error::PageNotFound(format!(
                        "index {} out of range (page count {})",
                        page.index,
                        pages.len()
                    ))
                })?;
                let data = tokio::fs::read(file).await?;
                self.validator.validate(&data).map_err(|reason| {
                    Error::InvalidImageData(format!("{}: {reason}", file.display()))
                })?;
                Ok(data)
            }
            ChapterSource::Remote { chapter_id } => {
                self.remote()?.fetch_page_bytes(chapter_id, page.index).await
            }
        }
    }

    fn remote(&self) -> Result<&Arc<dyn RemotePages>> {
        self.remote
            .as_ref()
            .ok_or_else(|| Error::Remote("no remote client configured".to_string()))
    }
}

/// Handle on in-flight prefetches; dropping it aborts them
pub struct Prefetch {
    tasks: JoinSet<()>,
}

impl Prefetch {
    /// Abort every prefetch that has not completed.
    pub fn cancel(mut self) {
        self.tasks.abort_all();
    }

    /// Wait for every prefetch to finish.
    pub async fn wait(mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
