use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::CacheEntry;
use crate::error::StorageError;
use crate::library::{LibrarySnapshot, Listing};

pub type StorageResult<T> = Result<T, StorageError>;

const LISTINGS_FILE: &str = "listings.json";
const CACHE_ENTRIES_FILE: &str = "cache_entries.json";
const SNAPSHOTS_FILE: &str = "library_snapshots.json";

#[async_trait]
pub trait ListingRepository: Send + Sync {
    async fn find_listing(&self, id: &str) -> StorageResult<Option<Listing>>;
    /// Listings for the ids that exist, in the order requested.
    async fn find_listings(&self, ids: &[String]) -> StorageResult<Vec<Listing>>;
    async fn list_listings(&self) -> StorageResult<Vec<Listing>>;
    async fn upsert_listings(&self, listings: Vec<Listing>) -> StorageResult<()>;
    async fn delete_listing(&self, id: &str) -> StorageResult<bool>;
}

#[async_trait]
pub trait CacheEntryRepository: Send + Sync {
    async fn find_entry(&self, external_id: &str) -> StorageResult<Option<CacheEntry>>;
    async fn list_entries(&self) -> StorageResult<Vec<CacheEntry>>;
    async fn upsert_entry(&self, entry: CacheEntry) -> StorageResult<()>;
    /// Bumps `last_access_date`; returns false when no record exists.
    async fn touch_entry(&self, external_id: &str, at: DateTime<Utc>) -> StorageResult<bool>;
    async fn delete_entry(&self, external_id: &str) -> StorageResult<bool>;
}

#[async_trait]
pub trait LibrarySnapshotRepository: Send + Sync {
    async fn load_snapshot(&self, name: &str) -> StorageResult<Option<LibrarySnapshot>>;
    async fn save_snapshot(&self, snapshot: LibrarySnapshot) -> StorageResult<()>;
}

/// JSON-file backed storage for listings, cache entries and library snapshots.
///
/// Each collection is one pretty-printed document under `data_dir`, mirrored in
/// memory. Writes replace the document atomically (write temp file, rename),
/// and the in-memory copy only changes once the document is on disk.
pub struct JsonStorage {
    data_dir: PathBuf,
    listings: RwLock<HashMap<String, Listing>>,
    cache_entries: RwLock<HashMap<String, CacheEntry>>,
    snapshots: RwLock<HashMap<String, LibrarySnapshot>>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(&data_dir).await?;

        let listings: HashMap<String, Listing> = load_collection(&data_dir.join(LISTINGS_FILE), |l: &Listing| {
            l.id.clone()
        })
        .await?;
        let cache_entries: HashMap<String, CacheEntry> =
            load_collection(&data_dir.join(CACHE_ENTRIES_FILE), |e: &CacheEntry| e.external_id.clone()).await?;
        let snapshots: HashMap<String, LibrarySnapshot> =
            load_collection(&data_dir.join(SNAPSHOTS_FILE), |s: &LibrarySnapshot| s.name.clone()).await?;

        info!(
            "📁 Storage initialized at {} ({} listings, {} cache entries, {} snapshots)",
            data_dir.display(),
            listings.len(),
            cache_entries.len(),
            snapshots.len()
        );

        Ok(Self {
            data_dir,
            listings: RwLock::new(listings),
            cache_entries: RwLock::new(cache_entries),
            snapshots: RwLock::new(snapshots),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Applies `change` to a copy of the collection, writes the copy and only
    /// then swaps it in. `change` returns false when nothing changed, in which
    /// case nothing is written.
    async fn commit<T, F>(&self, lock: &RwLock<HashMap<String, T>>, file: &str, change: F) -> StorageResult<bool>
    where
        T: Serialize + Clone + Send + Sync,
        F: FnOnce(&mut HashMap<String, T>) -> bool + Send,
    {
        let mut stored = lock.write().await;
        let mut next = stored.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.persist(file, &next).await?;
        *stored = next;
        Ok(true)
    }

    async fn persist<T: Serialize + Sync>(&self, file: &str, map: &HashMap<String, T>) -> StorageResult<()> {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        let values: Vec<&T> = keys.into_iter().filter_map(|k| map.get(k)).collect();

        let path = self.data_dir.join(file);
        let tmp = self.data_dir.join(format!("{file}.tmp"));
        let content = serde_json::to_string_pretty(&values)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!("💾 Wrote {} ({} records)", path.display(), values.len());
        Ok(())
    }
}

async fn load_collection<T, F>(path: &Path, key: F) -> StorageResult<HashMap<String, T>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> String,
{
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        warn!("Empty storage document {}, starting fresh", path.display());
        return Ok(HashMap::new());
    }

    let values: Vec<T> = serde_json::from_str(&content)?;
    Ok(values.into_iter().map(|v| (key(&v), v)).collect())
}

#[async_trait]
impl ListingRepository for JsonStorage {
    async fn find_listing(&self, id: &str) -> StorageResult<Option<Listing>> {
        Ok(self.listings.read().await.get(id).cloned())
    }

    async fn find_listings(&self, ids: &[String]) -> StorageResult<Vec<Listing>> {
        let listings = self.listings.read().await;
        Ok(ids.iter().filter_map(|id| listings.get(id).cloned()).collect())
    }

    async fn list_listings(&self) -> StorageResult<Vec<Listing>> {
        Ok(self.listings.read().await.values().cloned().collect())
    }

    async fn upsert_listings(&self, listings: Vec<Listing>) -> StorageResult<()> {
        self.commit(&self.listings, LISTINGS_FILE, |stored| {
            for listing in listings {
                stored.insert(listing.id.clone(), listing);
            }
            true
        })
        .await?;
        Ok(())
    }

    async fn delete_listing(&self, id: &str) -> StorageResult<bool> {
        self.commit(&self.listings, LISTINGS_FILE, |stored| stored.remove(id).is_some())
            .await
    }
}

#[async_trait]
impl CacheEntryRepository for JsonStorage {
    async fn find_entry(&self, external_id: &str) -> StorageResult<Option<CacheEntry>> {
        Ok(self.cache_entries.read().await.get(external_id).cloned())
    }

    async fn list_entries(&self) -> StorageResult<Vec<CacheEntry>> {
        Ok(self.cache_entries.read().await.values().cloned().collect())
    }

    async fn upsert_entry(&self, entry: CacheEntry) -> StorageResult<()> {
        self.commit(&self.cache_entries, CACHE_ENTRIES_FILE, |stored| {
            stored.insert(entry.external_id.clone(), entry);
            true
        })
        .await?;
        Ok(())
    }

    async fn touch_entry(&self, external_id: &str, at: DateTime<Utc>) -> StorageResult<bool> {
        self.commit(&self.cache_entries, CACHE_ENTRIES_FILE, |stored| {
            match stored.get_mut(external_id) {
                Some(entry) => {
                    entry.last_access_date = at;
                    true
                }
                None => false,
            }
        })
        .await
    }

    async fn delete_entry(&self, external_id: &str) -> StorageResult<bool> {
        self.commit(&self.cache_entries, CACHE_ENTRIES_FILE, |stored| {
            stored.remove(external_id).is_some()
        })
        .await
    }
}

#[async_trait]
impl LibrarySnapshotRepository for JsonStorage {
    async fn load_snapshot(&self, name: &str) -> StorageResult<Option<LibrarySnapshot>> {
        Ok(self.snapshots.read().await.get(name).cloned())
    }

    async fn save_snapshot(&self, snapshot: LibrarySnapshot) -> StorageResult<()> {
        info!("📝 Saving library snapshot '{}' ({} ids)", snapshot.name, snapshot.count);
        self.commit(&self.snapshots, SNAPSHOTS_FILE, |stored| {
            stored.insert(snapshot.name.clone(), snapshot);
            true
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn entry(id: &str) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            external_id: id.to_string(),
            title: format!("title {id}"),
            artist: None,
            thumbnail: None,
            initial_cache_date: now,
            last_access_date: now,
        }
    }

    #[tokio::test]
    async fn cache_entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
            storage.upsert_entry(entry("abc")).await.unwrap();
            storage.upsert_entry(entry("def")).await.unwrap();
            assert!(storage.delete_entry("def").await.unwrap());
        }

        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        let entries = storage.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].external_id, "abc");
    }

    #[tokio::test]
    async fn touch_updates_last_access_only_for_known_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        let original = entry("abc");
        storage.upsert_entry(original.clone()).await.unwrap();

        let later = original.last_access_date + Duration::minutes(3);
        assert!(storage.touch_entry("abc", later).await.unwrap());
        assert!(!storage.touch_entry("zzz", later).await.unwrap());

        let stored = storage.find_entry("abc").await.unwrap().unwrap();
        assert_eq!(stored.last_access_date, later);
        assert_eq!(stored.initial_cache_date, original.initial_cache_date);
    }

    #[tokio::test]
    async fn find_listings_keeps_request_order_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        storage
            .upsert_listings(vec![
                Listing::local("one", "One", "/m/one.mp3"),
                Listing::local("two", "Two", "/m/two.mp3"),
            ])
            .await
            .unwrap();

        let found = storage
            .find_listings(&["two".to_string(), "nope".to_string(), "one".to_string()])
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["two", "one"]);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let storage = JsonStorage::new(data.clone()).await.unwrap();
        storage.upsert_entry(entry("kept")).await.unwrap();

        std::fs::remove_dir_all(&data).unwrap();

        assert!(storage.upsert_entry(entry("lost")).await.is_err());
        assert!(storage.delete_entry("kept").await.is_err());
        assert!(storage.find_entry("lost").await.unwrap().is_none());
        assert!(storage.find_entry("kept").await.unwrap().is_some());
    }
}
