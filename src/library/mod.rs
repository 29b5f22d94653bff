//! # Library Module
//!
//! In-memory index of the local tracks the resolver searches.
//!
//! The index is rebuilt from a filesystem scan ([`scan`]) or hydrated from a
//! persisted snapshot (`{name, count, ids}`) plus the listing repository, which
//! avoids walking and re-tagging the whole library on every start.

pub mod model;
pub mod scan;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

pub use model::{Listing, LibrarySnapshot, Locator};
pub use scan::ScanSettings;

use crate::storage::{LibrarySnapshotRepository, ListingRepository};

#[derive(Debug, Default, Clone)]
pub struct ListingIndex {
    listings: Vec<Arc<Listing>>,
    by_id: HashMap<String, usize>,
    by_path: HashMap<PathBuf, usize>,
}

impl ListingIndex {
    pub fn new(listings: impl IntoIterator<Item = Listing>) -> Self {
        let mut index = Self::default();
        for listing in listings {
            index.insert(listing);
        }
        index
    }

    fn insert(&mut self, listing: Listing) {
        if let Some(&existing) = self.by_id.get(&listing.id) {
            warn!("Duplicate listing id {}, keeping the latest", listing.id);
            if let Some(path) = self.listings[existing].path() {
                self.by_path.remove(path);
            }
            if let Some(path) = listing.path() {
                self.by_path.insert(path.to_path_buf(), existing);
            }
            self.listings[existing] = Arc::new(listing);
            return;
        }

        let idx = self.listings.len();
        self.by_id.insert(listing.id.clone(), idx);
        if let Some(path) = listing.path() {
            self.by_path.insert(path.to_path_buf(), idx);
        }
        self.listings.push(Arc::new(listing));
    }

    /// Walks `root` and indexes every audio file found.
    pub fn scan(root: &Path, settings: &ScanSettings) -> Self {
        let index = Self::new(scan::scan(root, settings));
        info!("📚 Scanned {} listings from {}", index.len(), root.display());
        index
    }

    /// Hydrates from the snapshot named `name` when it is complete, otherwise
    /// rescans `root` and persists the fresh listings and snapshot.
    pub async fn load_or_scan(
        root: &Path,
        name: &str,
        settings: &ScanSettings,
        listings: &dyn ListingRepository,
        snapshots: &dyn LibrarySnapshotRepository,
    ) -> Result<Self> {
        if let Some(snapshot) = snapshots.load_snapshot(name).await? {
            match Self::from_snapshot(&snapshot, listings).await? {
                Some(index) => {
                    info!("📚 Library '{}' loaded from snapshot ({} listings)", name, index.len());
                    return Ok(index);
                }
                None => warn!("📚 Snapshot '{}' is stale, rescanning", name),
            }
        }

        let root_owned = root.to_path_buf();
        let settings_owned = settings.clone();
        let index = tokio::task::spawn_blocking(move || Self::scan(&root_owned, &settings_owned))
            .await
            .context("library scan task panicked")?;

        listings
            .upsert_listings(index.iter().map(|l| l.as_ref().clone()).collect())
            .await?;
        snapshots.save_snapshot(index.snapshot(name)).await?;

        Ok(index)
    }

    /// Returns `None` when the snapshot references listings the repository no
    /// longer has.
    pub async fn from_snapshot(
        snapshot: &LibrarySnapshot,
        listings: &dyn ListingRepository,
    ) -> Result<Option<Self>> {
        if snapshot.count != snapshot.ids.len() {
            return Ok(None);
        }

        let found = listings.find_listings(&snapshot.ids).await?;
        if found.len() != snapshot.count {
            return Ok(None);
        }

        Ok(Some(Self::new(found)))
    }

    pub fn snapshot(&self, name: &str) -> LibrarySnapshot {
        LibrarySnapshot {
            name: name.to_string(),
            count: self.listings.len(),
            ids: self.listings.iter().map(|l| l.id.clone()).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Listing>> {
        self.by_id.get(id).map(|&i| self.listings[i].clone())
    }

    pub fn by_path(&self, path: &Path) -> Option<Arc<Listing>> {
        self.by_path.get(path).map(|&i| self.listings[i].clone())
    }

    /// Listings whose artist matches `artist`, ignoring case.
    pub fn by_artist(&self, artist: &str) -> Vec<Arc<Listing>> {
        let wanted = artist.to_lowercase();
        self.listings
            .iter()
            .filter(|l| l.artist.as_deref().is_some_and(|a| a.to_lowercase() == wanted))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Listing>> {
        self.listings.iter()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonStorage;
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<Listing> {
        vec![
            Listing::local("a/1.mp3", "Pastel Sweater", "/music/a/1.mp3").with_artist("gugudan"),
            Listing::local("a/2.mp3", "The Boots", "/music/a/2.mp3").with_artist("gugudan"),
            Listing::local("b/1.mp3", "Rollin'", "/music/b/1.mp3").with_artist("Brave Girls"),
        ]
    }

    #[test]
    fn lookups_by_id_path_and_artist() {
        let index = ListingIndex::new(sample());

        assert_eq!(index.len(), 3);
        assert_eq!(index.get("a/2.mp3").unwrap().title, "The Boots");
        assert_eq!(
            index.by_path(Path::new("/music/b/1.mp3")).unwrap().id,
            "b/1.mp3"
        );
        assert_eq!(index.by_artist("GUGUDAN").len(), 2);
        assert!(index.get("missing").is_none());
    }

    #[test]
    fn duplicate_ids_keep_latest() {
        let mut listings = sample();
        listings.push(Listing::local("a/1.mp3", "Pastel Sweater (Remaster)", "/music/a/1.mp3"));
        let index = ListingIndex::new(listings);

        assert_eq!(index.len(), 3);
        assert_eq!(index.get("a/1.mp3").unwrap().title, "Pastel Sweater (Remaster)");
    }

    #[tokio::test]
    async fn snapshot_round_trip_avoids_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        let index = ListingIndex::new(sample());

        storage
            .upsert_listings(index.iter().map(|l| l.as_ref().clone()).collect())
            .await
            .unwrap();
        storage.save_snapshot(index.snapshot("library")).await.unwrap();

        // Library root does not exist: a rescan would find nothing.
        let loaded = ListingIndex::load_or_scan(
            &dir.path().join("nowhere"),
            "library",
            &ScanSettings::default(),
            &storage,
            &storage,
        )
        .await
        .unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get("b/1.mp3").unwrap().artist.as_deref(), Some("Brave Girls"));
    }

    #[tokio::test]
    async fn stale_snapshot_triggers_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().join("data")).await.unwrap();
        storage
            .save_snapshot(LibrarySnapshot {
                name: "library".into(),
                count: 1,
                ids: vec!["gone.mp3".into()],
            })
            .await
            .unwrap();

        let music = dir.path().join("music");
        std::fs::create_dir_all(&music).unwrap();
        std::fs::write(music.join("fresh.ogg"), b"x").unwrap();

        let loaded = ListingIndex::load_or_scan(&music, "library", &ScanSettings::default(), &storage, &storage)
            .await
            .unwrap();

        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("fresh.ogg").is_some());
        let snapshot = storage.load_snapshot("library").await.unwrap().unwrap();
        assert_eq!(snapshot.ids, vec!["fresh.ogg".to_string()]);
    }
}
