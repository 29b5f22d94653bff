use std::path::Path;

use lofty::prelude::*;
use lofty::tag::ItemKey;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::model::Listing;

/// Knobs for walking the library directory.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub extensions: Vec<String>,
    pub follow_links: bool,
    pub include_hidden: bool,
    pub max_depth: Option<usize>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            extensions: ["mp3", "flac", "ogg", "opus", "m4a", "wav", "webm"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            follow_links: false,
            include_hidden: false,
            max_depth: None,
        }
    }
}

fn is_audio_file(path: &Path, settings: &ScanSettings) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            settings
                .extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn non_empty(value: Option<impl AsRef<str>>) -> Option<String> {
    value
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Walks `root` and builds a listing per audio file, sorted by id.
///
/// Ids are the path relative to `root` with `/` separators, so they survive a
/// rescan as long as files do not move. Blocking; run it on a blocking thread.
pub fn scan(root: &Path, settings: &ScanSettings) -> Vec<Listing> {
    let mut listings = Vec::new();

    let mut walker = WalkDir::new(root).follow_links(settings.follow_links);
    if let Some(depth) = settings.max_depth {
        walker = walker.max_depth(depth);
    }

    for entry in walker
        .into_iter()
        .filter_entry(|e| settings.include_hidden || e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_audio_file(path, settings) {
            continue;
        }

        let id = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("UNKNOWN")
            .to_string();

        let mut listing = Listing::local(id, stem, path);

        match lofty::read_from_path(path) {
            Ok(tagged) => {
                listing = listing.with_duration(tagged.properties().duration());

                if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
                    if let Some(title) = non_empty(tag.title()) {
                        listing.title = title;
                    }
                    listing.artist = non_empty(tag.artist());
                    listing.album = non_empty(tag.album());

                    let mut tags = Vec::new();
                    if let Some(genre) = non_empty(tag.genre()) {
                        tags.extend(genre.split(['/', ';']).map(|g| g.trim().to_string()));
                    }
                    if let Some(mood) = non_empty(tag.get_string(&ItemKey::Mood)) {
                        tags.push(mood);
                    }
                    tags.retain(|t| !t.is_empty());
                    listing.tags = tags;
                    listing.musicbrainz_id = non_empty(tag.get_string(&ItemKey::MusicBrainzRecordingId));
                }
            }
            Err(e) => {
                warn!("🏷️ Could not read tags from {}: {}", path.display(), e);
            }
        }

        debug!("📀 Indexed {}", listing.id);
        listings.push(listing);
    }

    listings.sort_by(|a, b| a.id.cmp(&b.id));
    listings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn picks_up_audio_files_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("gugudan").join("act 5");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join("Pastel Sweater.mp3"), b"not really audio").unwrap();
        fs::write(album.join("cover.jpg"), b"jpeg").unwrap();
        fs::write(dir.path().join(".hidden.mp3"), b"x").unwrap();

        let listings = scan(dir.path(), &ScanSettings::default());

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, "gugudan/act 5/Pastel Sweater.mp3");
        // Unreadable tags fall back to the file stem.
        assert_eq!(listings[0].title, "Pastel Sweater");
        assert!(listings[0].duration_estimated);
    }

    #[test]
    fn respects_max_depth() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("top.flac"), b"x").unwrap();
        fs::write(nested.join("deep.flac"), b"x").unwrap();

        let settings = ScanSettings {
            max_depth: Some(1),
            ..ScanSettings::default()
        };
        let listings = scan(dir.path(), &settings);

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, "top.flac");
    }
}
