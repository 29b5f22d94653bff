use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a listing's audio lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    File { path: PathBuf },
    Remote { url: String },
}

/// Immutable description of something playable.
///
/// Local listings come from a library scan and carry genre/mood tags plus a
/// MusicBrainz id; remote listings are built from search results and live only
/// as long as the tracks that reference them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: u64,
    pub duration_estimated: bool,
    pub locator: Locator,
    pub artwork: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub musicbrainz_id: Option<String>,
}

impl Listing {
    pub fn local(id: impl Into<String>, title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            album: None,
            duration_secs: 0,
            duration_estimated: true,
            locator: Locator::File { path: path.into() },
            artwork: None,
            tags: Vec::new(),
            musicbrainz_id: None,
        }
    }

    pub fn remote(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            album: None,
            duration_secs: 0,
            duration_estimated: true,
            locator: Locator::Remote { url: url.into() },
            artwork: None,
            tags: Vec::new(),
            musicbrainz_id: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = duration.as_secs();
        self.duration_estimated = false;
        self
    }

    pub fn with_artwork(mut self, artwork: impl Into<String>) -> Self {
        self.artwork = Some(artwork.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.locator, Locator::Remote { .. })
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.locator {
            Locator::File { path } => Some(path),
            Locator::Remote { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.locator {
            Locator::Remote { url } => Some(url),
            Locator::File { .. } => None,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// "Artist - Title", or just the title when the artist is unknown.
    pub fn display_name(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} - {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

/// Persisted summary of a scanned library, used to skip full rescans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    pub name: String,
    pub count: usize,
    pub ids: Vec<String>,
}
