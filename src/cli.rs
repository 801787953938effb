use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::archive::DEFAULT_THUMBNAIL_SIZE;
use crate::cache::{CacheConfig, DEFAULT_MEMORY_BYTES, DEFAULT_MEMORY_ENTRIES};

#[derive(Parser, Debug)]
#[command(name = "cbzpage")]
#[command(version)]
#[command(about = "Read pages from comic archives through a tiered image cache", long_about = None)]
#[command(after_help = "Examples:\n  \
  cbzpage list -v chapter.cbz               list pages with sizes and dates\n  \
  cbzpage extract chapter.cbz 0 -o p.jpg    write the first page to p.jpg\n  \
  cbzpage thumbnail chapter.cbz 0 -o t.jpg  write a 300x400 preview of it\n  \
  cbzpage cache clear                       empty both cache tiers")]
pub struct Cli {
    /// Directory holding the on-disk cache tier
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of pages kept in memory
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MEMORY_ENTRIES, global = true)]
    pub memory_entries: usize,

    /// Maximum bytes of pages kept in memory
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MEMORY_BYTES, global = true)]
    pub memory_bytes: usize,

    /// Size the on-disk tier is trimmed to by `cache trim`
    #[arg(long, value_name = "BYTES", global = true)]
    pub disk_limit: Option<u64>,

    /// Quiet mode (errors only)
    #[arg(short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List pages in reading order
    List {
        /// Archive file or image folder
        #[arg(value_name = "CHAPTER")]
        chapter: PathBuf,

        /// Show sizes, compression ratio and timestamps
        #[arg(short = 'v')]
        verbose: bool,
    },

    /// Print the number of pages
    Count {
        #[arg(value_name = "CHAPTER")]
        chapter: PathBuf,
    },

    /// Write one page's image bytes to a file or stdout
    Extract {
        #[arg(value_name = "CHAPTER")]
        chapter: PathBuf,

        /// Zero-based page number
        #[arg(value_name = "PAGE")]
        page: usize,

        /// Output file (default: stdout)
        #[arg(short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Re-attempt transient failures this many times
        #[arg(long, value_name = "N", default_value_t = 0)]
        retries: u32,

        /// Read straight from the chapter, bypassing the cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Write a JPEG thumbnail of one page to a file or stdout
    Thumbnail {
        #[arg(value_name = "CHAPTER")]
        chapter: PathBuf,

        /// Zero-based page number
        #[arg(value_name = "PAGE")]
        page: usize,

        /// Output file (default: stdout)
        #[arg(short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Maximum thumbnail width in pixels
        #[arg(long, value_name = "PX", default_value_t = DEFAULT_THUMBNAIL_SIZE.0)]
        max_width: u32,

        /// Maximum thumbnail height in pixels
        #[arg(long, value_name = "PX", default_value_t = DEFAULT_THUMBNAIL_SIZE.1)]
        max_height: u32,
    },

    /// Unpack every page of an archive into a directory
    Unpack {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Destination directory (created if missing)
        #[arg(short = 'd', value_name = "DIR")]
        dest: PathBuf,
    },

    /// Manage the page cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Empty the memory and disk tiers
    Clear,

    /// Drop one page from both tiers
    Remove {
        #[arg(value_name = "CHAPTER")]
        chapter: PathBuf,

        #[arg(value_name = "PAGE")]
        page: usize,
    },

    /// Trim the disk tier to --disk-limit, oldest files first
    Trim,

    /// Show disk tier location and usage
    Info,
}

impl Cli {
    pub fn cache_config(&self) -> CacheConfig {
        let mut config = match &self.cache_dir {
            Some(dir) => CacheConfig::new(dir.clone()),
            None => CacheConfig::default(),
        };
        config.memory_entries = self.memory_entries;
        config.memory_bytes = self.memory_bytes;
        config.disk_limit = self.disk_limit;
        config
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.quiet { "error" } else { "info" }
    }
}
