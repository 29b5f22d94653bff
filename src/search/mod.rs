//! # Search Module
//!
//! Turns free text into something playable.
//!
//! Local listings are searched first with a cascading fuzzy match: each
//! [`ExtractionKey`] is tried in turn and the first one whose top hit clears
//! `min_score` wins. The winning hits are then classified:
//!
//! - **Artist**: the query names only an artist and the top hits all belong to it
//! - **Wide**: hits 2–5 sit within `wide_delta` of the top, unless weighting
//!   (skipping de-prioritized titles like "live") yields a clear winner
//! - otherwise a single track
//!
//! When nothing local clears the bar, the remote provider is asked.

pub mod query;
pub mod score;

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::config::SearchSettings;
use crate::error::ResolveError;
use crate::library::{Listing, ListingIndex};
use crate::sources::RemoteSearchProvider;

pub use query::ParsedQuery;

/// Which fields of a listing a cascade step matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKey {
    /// artist + title + album
    Base,
    Title,
    Artist,
    /// "artist title"
    Short,
    /// "title artist"
    ReversedShort,
}

impl ExtractionKey {
    pub const CASCADE: [ExtractionKey; 5] = [
        ExtractionKey::Base,
        ExtractionKey::Title,
        ExtractionKey::Artist,
        ExtractionKey::Short,
        ExtractionKey::ReversedShort,
    ];

    pub fn extract(&self, listing: &Listing) -> String {
        let artist = listing.artist.as_deref().unwrap_or_default();
        let title = listing.title.as_str();
        match self {
            Self::Base => [Some(artist), Some(title), listing.album.as_deref()]
                .into_iter()
                .flatten()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            Self::Title => title.to_string(),
            Self::Artist => artist.to_string(),
            Self::Short => format!("{} {}", artist, title),
            Self::ReversedShort => format!("{} {}", title, artist),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredListing {
    pub listing: Arc<Listing>,
    pub score: f64,
}

/// How a single-track result was found.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOrigin {
    Local { key: ExtractionKey, score: f64 },
    Remote { corrected_query: String, similarity: f64 },
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disambiguation {
    /// "Did you mean the whole discography of `artist`?"
    Artist { artist: String },
    /// Several near-equal candidates.
    Wide,
}

#[derive(Debug, Clone)]
pub enum ResolvedQuery {
    Track {
        listing: Arc<Listing>,
        origin: MatchOrigin,
    },
    Playlist {
        title: String,
        listings: Vec<Arc<Listing>>,
    },
    Disambiguation {
        kind: Disambiguation,
        candidates: Vec<Arc<Listing>>,
    },
}

pub struct QueryResolver {
    index: RwLock<Arc<ListingIndex>>,
    remote: Arc<dyn RemoteSearchProvider>,
    settings: SearchSettings,
}

impl QueryResolver {
    pub fn new(index: Arc<ListingIndex>, remote: Arc<dyn RemoteSearchProvider>, settings: SearchSettings) -> Self {
        Self {
            index: RwLock::new(index),
            remote,
            settings,
        }
    }

    /// Swaps in a freshly scanned index.
    pub fn replace_index(&self, index: Arc<ListingIndex>) {
        *self.index.write() = index;
    }

    pub fn index(&self) -> Arc<ListingIndex> {
        self.index.read().clone()
    }

    pub async fn resolve(&self, text: &str) -> Result<ResolvedQuery, ResolveError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ResolveError::NotFound(String::new()));
        }

        if let Some(url) = Self::as_web_url(text) {
            return self.resolve_url(url, text).await;
        }

        let parsed = ParsedQuery::parse(text);
        if let Some(resolved) = self.resolve_local(&parsed) {
            return Ok(resolved);
        }

        debug!("🔍 No local match for '{}', asking remote provider", text);
        match self.remote.search(&parsed.search_text).await.map_err(ResolveError::Remote)? {
            Some(hit) if hit.similarity >= self.settings.remote_min_similarity => {
                info!("🌐 Remote match '{}' ({:.1})", hit.corrected_query, hit.similarity);
                Ok(ResolvedQuery::Track {
                    listing: Arc::new(hit.listing),
                    origin: MatchOrigin::Remote {
                        corrected_query: hit.corrected_query,
                        similarity: hit.similarity,
                    },
                })
            }
            Some(hit) => {
                debug!(
                    "Remote match '{}' too far from query ({:.1})",
                    hit.corrected_query, hit.similarity
                );
                Err(ResolveError::NotFound(text.to_string()))
            }
            None => Err(ResolveError::NotFound(text.to_string())),
        }
    }

    fn as_web_url(text: &str) -> Option<Url> {
        Url::parse(text)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
    }

    async fn resolve_url(&self, url: Url, text: &str) -> Result<ResolvedQuery, ResolveError> {
        let is_playlist = url.query_pairs().any(|(k, _)| k == "list") && !url.query_pairs().any(|(k, _)| k == "v");

        if is_playlist {
            let playlist = self
                .remote
                .get_playlist(url.as_str())
                .await
                .map_err(ResolveError::Remote)?;
            if playlist.items.is_empty() {
                return Err(ResolveError::NotFound(text.to_string()));
            }
            info!("📋 Playlist '{}' with {} items", playlist.title, playlist.items.len());
            return Ok(ResolvedQuery::Playlist {
                title: playlist.title,
                listings: playlist.items.into_iter().map(Arc::new).collect(),
            });
        }

        match self.remote.get_track(url.as_str()).await.map_err(ResolveError::Remote)? {
            Some(listing) => Ok(ResolvedQuery::Track {
                listing: Arc::new(listing),
                origin: MatchOrigin::Url,
            }),
            None => Err(ResolveError::NotFound(text.to_string())),
        }
    }

    /// Runs the cascade over the local index; `None` means nothing cleared the bar.
    pub fn resolve_local(&self, parsed: &ParsedQuery) -> Option<ResolvedQuery> {
        let index = self.index();
        let (key, hits) = self.cascade(&index, &parsed.search_text)?;
        debug!(
            "🎯 '{}' matched on {:?} (top {:.1}, {} hits)",
            parsed.search_text,
            key,
            hits[0].score,
            hits.len()
        );
        Some(self.classify(&index, parsed, key, hits))
    }

    fn fuzzy_filter(&self, index: &ListingIndex, query: &str, key: ExtractionKey) -> Vec<ScoredListing> {
        let mut hits: Vec<ScoredListing> = index
            .iter()
            .map(|listing| ScoredListing {
                score: score::score_normalized(query, &key.extract(listing)),
                listing: listing.clone(),
            })
            .filter(|hit| hit.score >= self.settings.filter_floor)
            .collect();
        // Stable: ties keep index order.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits
    }

    fn cascade(&self, index: &ListingIndex, query: &str) -> Option<(ExtractionKey, Vec<ScoredListing>)> {
        if query.is_empty() {
            return None;
        }
        ExtractionKey::CASCADE.into_iter().find_map(|key| {
            let hits = self.fuzzy_filter(index, query, key);
            let top = hits.first()?.score;
            (top >= self.settings.min_score).then_some((key, hits))
        })
    }

    fn classify(
        &self,
        index: &ListingIndex,
        parsed: &ParsedQuery,
        key: ExtractionKey,
        hits: Vec<ScoredListing>,
    ) -> ResolvedQuery {
        if let Some(token) = parsed.artist_intent() {
            if let Some(artist) = Self::shared_artist(&hits[..hits.len().min(4)], token) {
                let candidates = index.by_artist(&artist);
                info!("🎤 Artist query for '{}' ({} tracks)", artist, candidates.len());
                return ResolvedQuery::Disambiguation {
                    kind: Disambiguation::Artist { artist },
                    candidates,
                };
            }
        }

        let top_score = hits[0].score;
        let window: Vec<&ScoredListing> = hits
            .iter()
            .take(5)
            .filter(|hit| top_score - hit.score <= self.settings.wide_delta)
            .collect();

        let is_wide = hits.len() >= 2 && hits.iter().take(5).skip(1).all(|hit| top_score - hit.score <= self.settings.wide_delta);

        let unweighted: Vec<usize> = window
            .iter()
            .enumerate()
            .filter(|(_, hit)| !score::contains_term(&hit.listing.title, &self.settings.deprioritized_terms))
            .map(|(i, _)| i)
            .collect();
        let winner = unweighted.first().copied().unwrap_or(0);
        let clear_winner = winner != 0 || unweighted.len() == 1;

        if is_wide && !clear_winner {
            return ResolvedQuery::Disambiguation {
                kind: Disambiguation::Wide,
                candidates: window.iter().map(|hit| hit.listing.clone()).collect(),
            };
        }

        let chosen = window[winner];
        ResolvedQuery::Track {
            listing: chosen.listing.clone(),
            origin: MatchOrigin::Local {
                key,
                score: chosen.score,
            },
        }
    }

    /// The artist every hit shares, when it equals or prefixes `token`.
    fn shared_artist(hits: &[ScoredListing], token: &str) -> Option<String> {
        let first = hits.first()?.listing.artist.clone()?;
        let normalized = score::normalize(&first);
        if normalized.is_empty() || !token.starts_with(&normalized) {
            return None;
        }
        hits.iter()
            .all(|hit| {
                hit.listing
                    .artist
                    .as_deref()
                    .is_some_and(|a| score::normalize(a) == normalized)
            })
            .then_some(first)
    }
}
