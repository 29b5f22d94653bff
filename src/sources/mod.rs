pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::library::{Listing, ListingIndex, Locator};

pub use ytdlp::YtDlpClient;

/// A queued playback intent: a listing plus who asked for it.
#[derive(Debug, Clone)]
pub enum Track {
    Local {
        listing: Arc<Listing>,
        requested_by: UserId,
    },
    Remote {
        listing: Arc<Listing>,
        requested_by: UserId,
    },
}

impl Track {
    pub fn new(listing: Arc<Listing>, requested_by: UserId) -> Self {
        match listing.locator {
            Locator::File { .. } => Self::Local { listing, requested_by },
            Locator::Remote { .. } => Self::Remote { listing, requested_by },
        }
    }

    pub fn listing(&self) -> &Arc<Listing> {
        match self {
            Self::Local { listing, .. } | Self::Remote { listing, .. } => listing,
        }
    }

    pub fn requested_by(&self) -> UserId {
        match self {
            Self::Local { requested_by, .. } | Self::Remote { requested_by, .. } => *requested_by,
        }
    }

    pub fn id(&self) -> &str {
        &self.listing().id
    }

    pub fn title(&self) -> &str {
        &self.listing().title
    }

    pub fn duration(&self) -> Duration {
        self.listing().duration()
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Serializable form used by playlists and queue export.
    pub fn to_playlist_item(&self) -> PlaylistItem {
        match self {
            Self::Local { listing, .. } => PlaylistItem::Local {
                listing_id: listing.id.clone(),
            },
            Self::Remote { listing, .. } => PlaylistItem::Remote {
                id: listing.id.clone(),
                url: listing.url().unwrap_or_default().to_string(),
                title: listing.title.clone(),
                artist: listing.artist.clone(),
                duration_secs: listing.duration_secs,
                thumbnail: listing.artwork.clone(),
            },
        }
    }
}

/// A track as stored in a playlist, independent of who queued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PlaylistItem {
    Local {
        listing_id: String,
    },
    Remote {
        id: String,
        url: String,
        title: String,
        artist: Option<String>,
        duration_secs: u64,
        thumbnail: Option<String>,
    },
}

impl PlaylistItem {
    /// Rebuilds a track for replay. Local items whose listing left the library
    /// come back as `None`.
    pub fn hydrate(&self, index: &ListingIndex, requested_by: UserId) -> Option<Track> {
        match self {
            Self::Local { listing_id } => match index.get(listing_id) {
                Some(listing) => Some(Track::new(listing, requested_by)),
                None => {
                    warn!("🎼 Playlist references missing listing {}", listing_id);
                    None
                }
            },
            Self::Remote {
                id,
                url,
                title,
                artist,
                duration_secs,
                thumbnail,
            } => {
                let mut listing = Listing::remote(id.clone(), title.clone(), url.clone());
                listing.artist = artist.clone();
                listing.artwork = thumbnail.clone();
                if *duration_secs > 0 {
                    listing = listing.with_duration(Duration::from_secs(*duration_secs));
                }
                Some(Track::new(Arc::new(listing), requested_by))
            }
        }
    }

    pub fn hydrate_all(items: &[PlaylistItem], index: &ListingIndex, requested_by: UserId) -> Vec<Track> {
        items.iter().filter_map(|item| item.hydrate(index, requested_by)).collect()
    }
}

/// Best remote match for a free-text query.
#[derive(Debug, Clone)]
pub struct RemoteSearchHit {
    pub url: String,
    pub listing: Listing,
    pub corrected_query: String,
    /// 0..=100, how close the hit is to what was asked.
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct RemotePlaylist {
    pub title: String,
    pub items: Vec<Listing>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSearchProvider: Send + Sync {
    async fn search(&self, text: &str) -> Result<Option<RemoteSearchHit>>;

    async fn get_playlist(&self, url: &str) -> Result<RemotePlaylist>;

    /// Resolves a single video URL to its listing.
    async fn get_track(&self, url: &str) -> Result<Option<Listing>>;
}

/// Looks up metadata for a remote id, used to backfill cache records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// `Ok(None)` means the id no longer exists remotely.
    async fn lookup(&self, external_id: &str) -> Result<Option<Listing>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn user() -> UserId {
        UserId::new(7)
    }

    #[test]
    fn variant_follows_locator() {
        let local = Track::new(Arc::new(Listing::local("a", "A", "/m/a.mp3")), user());
        let remote = Track::new(
            Arc::new(Listing::remote("xyz", "X", "https://www.youtube.com/watch?v=xyz")),
            user(),
        );

        assert!(!local.is_remote());
        assert!(remote.is_remote());
        assert_eq!(remote.requested_by(), user());
    }

    #[test]
    fn playlist_items_hydrate_against_the_index() {
        let index = ListingIndex::new(vec![Listing::local("a", "A", "/m/a.mp3")]);
        let remote = Listing::remote("xyz", "X", "https://www.youtube.com/watch?v=xyz")
            .with_artist("Someone")
            .with_duration(Duration::from_secs(200));

        let items = vec![
            Track::new(index.get("a").unwrap(), user()).to_playlist_item(),
            PlaylistItem::Local {
                listing_id: "deleted".into(),
            },
            Track::new(Arc::new(remote.clone()), user()).to_playlist_item(),
        ];

        let tracks = PlaylistItem::hydrate_all(&items, &index, UserId::new(9));

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id(), "a");
        assert_eq!(tracks[1].listing().as_ref(), &remote);
        assert_eq!(tracks[1].requested_by(), UserId::new(9));
    }

    #[test]
    fn playlist_item_json_is_tagged_by_source() {
        let item = PlaylistItem::Local {
            listing_id: "a/b.mp3".into(),
        };
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(json, r#"{"source":"local","listing_id":"a/b.mp3"}"#);
    }
}
