//! Main entry point for the cbzpage CLI application.
//!
//! This binary lists and extracts comic archive pages, serving repeated
//! requests from the tiered image cache.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cbzpage::cli::{CacheCommand, Command};
use cbzpage::{ChapterSource, Cli, ComicArchive, ImageCache, ImageFormat, PageRef, PageService};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_filter());

    match &cli.command {
        Command::List { chapter, verbose } => list_pages(&cli, chapter, *verbose).await,
        Command::Count { chapter } => {
            let service = open_service(&cli).await?;
            let source = ChapterSource::detect(chapter)?;
            println!("{}", service.page_count(&source).await?);
            Ok(())
        }
        Command::Extract {
            chapter,
            page,
            output,
            retries,
            no_cache,
        } => {
            let source = ChapterSource::detect(chapter)?;
            let page = PageRef::new(source, *page);
            let data = extract_with_retries(&cli, &page, *retries, *no_cache).await?;

            if !cli.quiet {
                let kind = ImageFormat::sniff(&data)
                    .map(|f| f.mime_type())
                    .unwrap_or("unknown type");
                eprintln!("{page}: {} ({kind})", format_size(data.len() as u64));
            }

            write_output(output.as_deref(), &data).await
        }
        Command::Thumbnail {
            chapter,
            page,
            output,
            max_width,
            max_height,
        } => {
            let service = open_service(&cli).await?;
            let page = PageRef::new(ChapterSource::detect(chapter)?, *page);
            let data = service
                .get_page_thumbnail(&page, *max_width, *max_height)
                .await
                .with_context(|| format!("thumbnail of {page}"))?;
            if !cli.quiet {
                eprintln!("{page}: thumbnail {}", format_size(data.len() as u64));
            }
            write_output(output.as_deref(), &data).await
        }
        Command::Unpack { archive, dest } => {
            let written = ComicArchive::open(archive)?
                .extract_pages_to(dest)
                .await
                .with_context(|| format!("unpacking {}", archive.display()))?;
            if !cli.quiet {
                for path in &written {
                    eprintln!("  inflating: {}", path.display());
                }
            }
            Ok(())
        }
        Command::Cache(command) => cache_command(&cli, command).await,
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the CLI-derived default filter.
fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn open_service(cli: &Cli) -> Result<PageService> {
    let config = cli.cache_config();
    let root = config.root.clone();
    let cache = ImageCache::open(config)
        .await
        .with_context(|| format!("opening cache at {}", root.display()))?;
    Ok(PageService::new(Arc::new(cache)))
}

/// List pages in a chapter.
///
/// Supports two output formats:
/// - Simple format: just page names, one per line
/// - Verbose format (`-v`, archives only): table with size, compression ratio and timestamps
async fn list_pages(cli: &Cli, chapter: &Path, verbose: bool) -> Result<()> {
    let source = ChapterSource::detect(chapter)?;

    let ChapterSource::Archive(path) = &source else {
        let service = open_service(cli).await?;
        for name in service.list_pages(&source).await? {
            println!("{name}");
        }
        return Ok(());
    };

    let archive = ComicArchive::open(path)?;
    let pages = archive.pages().await?;

    if !verbose {
        for page in &pages {
            println!("{}", page.path);
        }
        return Ok(());
    }

    println!(
        "{:>5}  {:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Page", "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(77));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;

    for (index, page) in pages.iter().enumerate() {
        let (year, month, day) = page.mod_date();
        let (hour, minute, _second) = page.mod_time();

        println!(
            "{:>5}  {:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            index,
            page.uncompressed_size,
            page.compressed_size,
            ratio(page.compressed_size as u64, page.uncompressed_size as u64),
            year,
            month,
            day,
            hour,
            minute,
            page.path
        );

        total_uncompressed += page.uncompressed_size as u64;
        total_compressed += page.compressed_size as u64;
    }

    println!("{}", "-".repeat(77));
    println!(
        "{:>5}  {:>10}  {:>10}  {}  {:>21}  {} pages",
        "",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        pages.len()
    );

    Ok(())
}

/// Fetch a page, re-attempting transient failures up to `retries` times.
async fn extract_with_retries(
    cli: &Cli,
    page: &PageRef,
    retries: u32,
    no_cache: bool,
) -> Result<Vec<u8>> {
    let service = open_service(cli).await?;
    let mut attempt = 0;
    loop {
        let result = if no_cache {
            service.load_page(page).await
        } else {
            service.get_page_image(page).await.map(|b| b.to_vec())
        };

        match result {
            Ok(data) => return Ok(data),
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                warn!(%page, attempt, retries, error = %e, "retrying page extraction");
            }
            Err(e) => return Err(e).with_context(|| format!("extracting {page}")),
        }
    }
}

/// Write image bytes to `path`, or to stdout when no path is given.
async fn write_output(path: Option<&Path>, data: &[u8]) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, data)
            .await
            .with_context(|| format!("writing {}", path.display())),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(data).await?;
            stdout.flush().await?;
            Ok(())
        }
    }
}

async fn cache_command(cli: &Cli, command: &CacheCommand) -> Result<()> {
    let service = open_service(cli).await?;
    let cache = service.cache();

    match command {
        CacheCommand::Clear => {
            service.clear_all_cache().await?;
            if !cli.quiet {
                eprintln!("Cache cleared: {}", cache.disk().root().display());
            }
        }
        CacheCommand::Remove { chapter, page } => {
            let source = ChapterSource::detect(chapter)?;
            let key = PageRef::new(source, *page).cache_key();
            service.invalidate_cache(&key).await;
        }
        CacheCommand::Trim => {
            if cli.disk_limit.is_none() {
                anyhow::bail!("cache trim needs --disk-limit");
            }
            let removed = cache.trim_disk().await?;
            if !cli.quiet {
                eprintln!("Removed {removed} cached pages");
            }
        }
        CacheCommand::Info => {
            println!("{}", cache.disk().root().display());
            println!("{}", format_size(cache.disk_usage().await?));
        }
    }

    Ok(())
}

/// Compression ratio as percentage saved
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 {
        format!(
            "{:>4}%",
            100i64 - (compressed * 100 / uncompressed) as i64
        )
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size into a human-readable string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// assert_eq!(format_size(1048576), "1.00 MB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
