use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{MetadataLookup, RemotePlaylist, RemoteSearchHit, RemoteSearchProvider};
use crate::library::Listing;
use crate::search::score;

/// Remote search and metadata via the `yt-dlp` binary.
pub struct YtDlpClient {
    program: String,
    // Limit concurrent yt-dlp processes to stay under rate limits
    rate_limiter: Semaphore,
    max_playlist_items: usize,
}

/// Subset of yt-dlp's `--dump-json` output we care about.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: Option<String>,
    track: Option<String>,
    artist: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtDlpPlaylist {
    title: Option<String>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

const GONE_MARKERS: [&str; 4] = [
    "video unavailable",
    "private video",
    "has been removed",
    "does not exist",
];

impl YtDlpClient {
    pub fn new() -> Self {
        Self::with_program("yt-dlp")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            rate_limiter: Semaphore::new(3),
            max_playlist_items: 100,
        }
    }

    pub fn watch_url(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", id)
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        let _permit = self.rate_limiter.acquire().await?;
        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))
    }

    fn info_to_listing(info: YtDlpInfo) -> Listing {
        let url = info
            .webpage_url
            .or(info.url.filter(|u| u.starts_with("http")))
            .unwrap_or_else(|| Self::watch_url(&info.id));
        let title = info
            .track
            .or(info.title)
            .unwrap_or_else(|| "Unknown".to_string());

        let mut listing = Listing::remote(info.id, title, url);
        listing.artist = info.artist.or(info.uploader).or(info.channel);
        listing.artwork = info.thumbnail;
        if let Some(secs) = info.duration.filter(|d| *d > 0.0) {
            listing = listing.with_duration(Duration::from_secs_f64(secs));
        }
        listing
    }

    fn parse_info(line: &str) -> Option<Listing> {
        serde_json::from_str::<YtDlpInfo>(line)
            .map(Self::info_to_listing)
            .map_err(|e| debug!("Skipping unparsable yt-dlp line: {}", e))
            .ok()
    }

    fn parse_playlist(raw: &str) -> Result<RemotePlaylist> {
        let playlist: YtDlpPlaylist = serde_json::from_str(raw).context("invalid yt-dlp playlist json")?;
        Ok(RemotePlaylist {
            title: playlist.title.unwrap_or_else(|| "Playlist".to_string()),
            items: playlist.entries.into_iter().map(Self::info_to_listing).collect(),
        })
    }

    fn is_gone(stderr: &str) -> bool {
        let lower = stderr.to_lowercase();
        GONE_MARKERS.iter().any(|m| lower.contains(m))
    }
}

impl Default for YtDlpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSearchProvider for YtDlpClient {
    async fn search(&self, text: &str) -> Result<Option<RemoteSearchHit>> {
        info!("🔍 Remote search: {}", text);

        let query = format!("ytsearch1:{}", text);
        let output = self
            .run(&["--dump-json", "--no-playlist", "--skip-download", "--no-warnings", &query])
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp search error: {}", error.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(listing) = stdout.lines().find_map(Self::parse_info) else {
            return Ok(None);
        };

        let corrected_query = listing.display_name();
        let similarity = score::similarity(text, &corrected_query);
        Ok(Some(RemoteSearchHit {
            url: listing.url().unwrap_or_default().to_string(),
            listing,
            corrected_query,
            similarity,
        }))
    }

    async fn get_playlist(&self, url: &str) -> Result<RemotePlaylist> {
        info!("📋 Fetching playlist: {}", url);

        let limit = self.max_playlist_items.to_string();
        let output = self
            .run(&[
                "--flat-playlist",
                "--dump-single-json",
                "--playlist-end",
                &limit,
                "--no-warnings",
                url,
            ])
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp playlist error: {}", error.trim());
        }

        Self::parse_playlist(&String::from_utf8_lossy(&output.stdout))
    }

    async fn get_track(&self, url: &str) -> Result<Option<Listing>> {
        let output = self
            .run(&["--dump-json", "--no-playlist", "--skip-download", "--no-warnings", url])
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            if Self::is_gone(&error) {
                return Ok(None);
            }
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(Self::parse_info))
    }
}

#[async_trait]
impl MetadataLookup for YtDlpClient {
    async fn lookup(&self, external_id: &str) -> Result<Option<Listing>> {
        let listing = self.get_track(&Self::watch_url(external_id)).await?;
        if listing.is_none() {
            warn!("🕳️ Remote id {} no longer exists", external_id);
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_search_line() {
        let line = r#"{"id":"dQw4w9WgXcQ","title":"Pastel Sweater (Official)","uploader":"gugudan","duration":201.4,"thumbnail":"https://i.ytimg.com/x.jpg","webpage_url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"}"#;
        let listing = YtDlpClient::parse_info(line).unwrap();

        assert_eq!(listing.id, "dQw4w9WgXcQ");
        assert_eq!(listing.artist.as_deref(), Some("gugudan"));
        assert_eq!(listing.duration_secs, 201);
        assert!(!listing.duration_estimated);
        assert_eq!(listing.url(), Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
    }

    #[test]
    fn prefers_music_metadata_and_builds_missing_url() {
        let line = r#"{"id":"abc","title":"gugudan - Pastel Sweater MV","track":"Pastel Sweater","artist":"gugudan","uploader":"Jellyfish"}"#;
        let listing = YtDlpClient::parse_info(line).unwrap();

        assert_eq!(listing.title, "Pastel Sweater");
        assert_eq!(listing.artist.as_deref(), Some("gugudan"));
        assert_eq!(listing.url(), Some("https://www.youtube.com/watch?v=abc"));
        assert!(listing.duration_estimated);
    }

    #[test]
    fn parses_flat_playlist() {
        let raw = r#"{"title":"Mix","entries":[{"id":"a","title":"One","url":"https://www.youtube.com/watch?v=a"},{"id":"b","title":"Two"}]}"#;
        let playlist = YtDlpClient::parse_playlist(raw).unwrap();

        assert_eq!(playlist.title, "Mix");
        assert_eq!(playlist.items.len(), 2);
        assert_eq!(playlist.items[1].url(), Some("https://www.youtube.com/watch?v=b"));
    }

    #[test]
    fn detects_removed_videos() {
        assert!(YtDlpClient::is_gone("ERROR: [youtube] abc: Video unavailable"));
        assert!(!YtDlpClient::is_gone("ERROR: unable to download webpage: timed out"));
    }
}
