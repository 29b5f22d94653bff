use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use guild_audio::cache::StreamCache;
use guild_audio::config::Config;
use guild_audio::library::{scan::ScanSettings, ListingIndex};
use guild_audio::search::{QueryResolver, ResolvedQuery};
use guild_audio::sources::{ytdlp::YtDlpClient, MetadataLookup, RemoteSearchProvider};
use guild_audio::storage::{JsonStorage, LibrarySnapshotRepository, ListingRepository};

const USAGE: &str = "usage: guild-audio [--health-check | scan | validate-cache | resolve <query...>]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_audio=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Guild Audio v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("{}", config.summary());

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    let result = match args.first().map(String::as_str) {
        Some("scan") => scan(&config).await,
        Some("validate-cache") => validate_cache(&config).await,
        Some("resolve") => resolve(&config, &args[1..].join(" ")).await,
        _ => {
            println!("{USAGE}");
            return Ok(());
        }
    };

    if let Err(e) = &result {
        error!("❌ {:#}", e);
    }
    result
}

/// Rebuilds the library index from disk and replaces the stored snapshot.
async fn scan(config: &Config) -> Result<()> {
    let Some(root) = config.library_dir.clone() else {
        bail!("LIBRARY_DIR is not set");
    };

    let storage = JsonStorage::new(config.data_dir.clone()).await?;
    let settings = ScanSettings::default();
    let index = tokio::task::spawn_blocking(move || ListingIndex::scan(&root, &settings))
        .await
        .context("library scan task panicked")?;

    storage
        .upsert_listings(index.iter().map(|l| l.as_ref().clone()).collect())
        .await?;
    storage.save_snapshot(index.snapshot(&config.library_snapshot)).await?;

    info!("✅ Library '{}' saved with {} listings", config.library_snapshot, index.len());
    Ok(())
}

/// Reconciles the stream cache directory with its records.
async fn validate_cache(config: &Config) -> Result<()> {
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);
    let lookup: Arc<dyn MetadataLookup> = Arc::new(YtDlpClient::with_program(&config.decoder.program));
    let cache = StreamCache::new(config.cache_dir.clone(), config.cache_limit, storage, Some(lookup)).await?;

    let report = cache.clean_and_validate().await?;
    info!(
        "✅ Cache validated: {} pruned, {} backfilled, {} orphans removed, {} unresolved, {} evicted",
        report.pruned_records, report.backfilled, report.removed_orphans, report.unresolved, report.evicted
    );
    if report.removed_partials > 0 {
        info!("🧹 Removed {} interrupted downloads", report.removed_partials);
    }
    info!(
        "💽 {} items, {:.1} MiB remaining",
        report.remaining_items,
        report.remaining_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

/// Prints how a play request would be classified.
async fn resolve(config: &Config, query: &str) -> Result<()> {
    let storage = JsonStorage::new(config.data_dir.clone()).await?;
    let index = match &config.library_dir {
        Some(root) => {
            ListingIndex::load_or_scan(
                root,
                &config.library_snapshot,
                &ScanSettings::default(),
                &storage as &dyn ListingRepository,
                &storage as &dyn LibrarySnapshotRepository,
            )
            .await?
        }
        None => {
            warn!("📚 LIBRARY_DIR is not set, resolving against remote search only");
            ListingIndex::new(Vec::new())
        }
    };

    let remote: Arc<dyn RemoteSearchProvider> = Arc::new(YtDlpClient::with_program(&config.decoder.program));
    let resolver = QueryResolver::new(Arc::new(index), remote, config.search.clone());

    match resolver.resolve(query).await? {
        ResolvedQuery::Track { listing, origin } => {
            println!("track: {} ({:?})", listing.display_name(), origin);
        }
        ResolvedQuery::Playlist { title, listings } => {
            println!("playlist: {} ({} tracks)", title, listings.len());
            for listing in listings {
                println!("  - {}", listing.display_name());
            }
        }
        ResolvedQuery::Disambiguation { kind, candidates } => {
            println!("ambiguous: {:?}", kind);
            for listing in candidates {
                println!("  - {}", listing.display_name());
            }
        }
    }
    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    println!("Running health check...");

    let decoder = async_process::Command::new(&config.decoder.program)
        .arg("--version")
        .output()
        .await;

    match decoder {
        Ok(output) if output.status.success() => {
            println!("{}: OK", config.decoder.program);
        }
        _ => {
            bail!("{} not available", config.decoder.program);
        }
    }

    let ffmpeg = async_process::Command::new("ffmpeg").arg("-version").output().await;

    match ffmpeg {
        Ok(output) if output.status.success() => {
            println!("ffmpeg: OK");
        }
        _ => {
            bail!("ffmpeg not available");
        }
    }

    if let Some(root) = &config.library_dir {
        if !root.is_dir() {
            bail!("library directory {} does not exist", root.display());
        }
        println!("library: OK");
    }

    println!("Health check passed!");
    Ok(())
}
