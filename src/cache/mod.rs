//! # Cache Module
//!
//! Disk-bounded cache of remote audio streams, keyed by remote track id.
//!
//! Every cached stream is one blob at `<cache root>/<id>` plus a [`CacheEntry`]
//! record in the [`CacheEntryRepository`]. Downloads go to a hidden
//! `.<id>.<nonce>.part` file that is renamed into place once complete, so a
//! blob is never half written and concurrent saves of one id never touch each
//! other's data. A crash can still leave a blob without its record, which
//! [`StreamCache::clean_and_validate`] later backfills or deletes, along with
//! any stale `.part` files.
//!
//! ## Eviction
//!
//! Configured through [`CacheLimit`]: by total bytes or by item count, oldest
//! `last_access_date` first. An unbounded cache never evicts.

pub mod eviction;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CacheLimit;
use crate::error::CacheError;
use crate::library::Listing;
use crate::sources::MetadataLookup;
use crate::storage::CacheEntryRepository;

use eviction::SizedEntry;

/// Persisted record for one cached blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub external_id: String,
    pub title: String,
    pub artist: Option<String>,
    pub thumbnail: Option<String>,
    pub initial_cache_date: DateTime<Utc>,
    pub last_access_date: DateTime<Utc>,
}

impl CacheEntry {
    pub fn from_listing(listing: &Listing, at: DateTime<Utc>) -> Self {
        Self {
            external_id: listing.id.clone(),
            title: listing.title.clone(),
            artist: listing.artist.clone(),
            thumbnail: listing.artwork.clone(),
            initial_cache_date: at,
            last_access_date: at,
        }
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheReport {
    /// Records whose blob was missing.
    pub pruned_records: usize,
    /// Orphan blobs that got a record.
    pub backfilled: usize,
    /// Orphan blobs deleted because their id no longer exists remotely.
    pub removed_orphans: usize,
    /// Orphan blobs left alone because the lookup failed.
    pub unresolved: usize,
    /// Leftover `.part` files from interrupted downloads.
    pub removed_partials: usize,
    pub evicted: usize,
    pub remaining_items: usize,
    pub remaining_bytes: u64,
}

/// Handle on an in-progress [`StreamCache::save`].
#[derive(Debug)]
pub struct CancelHandle {
    id: String,
    token: CancellationToken,
    task: JoinHandle<Result<u64, CacheError>>,
}

impl CancelHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stops the write; the partial blob is removed and no record is written.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the write to settle; returns the number of bytes cached.
    pub async fn join(self) -> Result<u64, CacheError> {
        self.task
            .await
            .map_err(|e| CacheError::Io(io::Error::other(e)))?
    }
}

pub struct StreamCache {
    root: PathBuf,
    limit: CacheLimit,
    entries: Arc<dyn CacheEntryRepository>,
    lookup: Option<Arc<dyn MetadataLookup>>,
    /// Number of saves currently writing each id.
    in_flight: DashMap<String, usize>,
}

impl StreamCache {
    pub async fn new(
        root: PathBuf,
        limit: CacheLimit,
        entries: Arc<dyn CacheEntryRepository>,
        lookup: Option<Arc<dyn MetadataLookup>>,
    ) -> Result<Self, CacheError> {
        fs::create_dir_all(&root).await?;
        info!("💽 Stream cache at {} ({:?})", root.display(), limit);
        Ok(Self {
            root,
            limit,
            entries,
            lookup,
            in_flight: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, external_id: &str) -> PathBuf {
        self.root.join(file_name(external_id))
    }

    pub fn is_in_flight(&self, external_id: &str) -> bool {
        self.in_flight.contains_key(external_id)
    }

    fn partial_path(&self, external_id: &str) -> PathBuf {
        self.root.join(format!(
            ".{}.{:016x}{PARTIAL_SUFFIX}",
            file_name(external_id),
            rand::random::<u64>()
        ))
    }

    fn begin_write(&self, external_id: &str) {
        *self.in_flight.entry(external_id.to_string()).or_insert(0) += 1;
    }

    fn end_write(&self, external_id: &str) {
        if let Entry::Occupied(mut writers) = self.in_flight.entry(external_id.to_string()) {
            if *writers.get() <= 1 {
                writers.remove();
            } else {
                *writers.get_mut() -= 1;
            }
        }
    }

    /// Path of the cached blob, bumping its last access. IO and storage
    /// failures are logged and reported as a miss.
    pub async fn get(&self, external_id: &str) -> Option<PathBuf> {
        match self.try_get(external_id).await {
            Ok(path) => path,
            Err(e) => {
                warn!("💽 Cache lookup for {} failed, treating as miss: {}", external_id, e);
                None
            }
        }
    }

    async fn try_get(&self, external_id: &str) -> Result<Option<PathBuf>, CacheError> {
        if self.is_in_flight(external_id) {
            return Ok(None);
        }
        if self.entries.find_entry(external_id).await?.is_none() {
            return Ok(None);
        }

        let path = self.blob_path(external_id);
        if !fs::try_exists(&path).await? {
            warn!("💽 Blob for {} vanished, pruning record", external_id);
            self.entries.delete_entry(external_id).await?;
            return Ok(None);
        }

        self.entries.touch_entry(external_id, Utc::now()).await?;
        debug!("💽 Cache hit: {}", external_id);
        Ok(Some(path))
    }

    /// Streams `source` into the blob for `listing` in the background.
    ///
    /// The record is written only after the stream ends cleanly; a stream
    /// error or [`CancelHandle::cancel`] removes the partial blob instead.
    pub fn save<S>(self: &Arc<Self>, listing: &Listing, source: S) -> CancelHandle
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
    {
        let token = CancellationToken::new();
        let id = listing.id.clone();
        self.begin_write(&id);

        let cache = self.clone();
        let listing = listing.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let result = cache.store(&listing, source, &task_token).await;
            cache.end_write(&listing.id);
            result
        });

        CancelHandle { id, token, task }
    }

    async fn store<S>(&self, listing: &Listing, mut source: S, token: &CancellationToken) -> Result<u64, CacheError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        let partial = self.partial_path(&listing.id);

        let result = match Self::write_blob(&partial, &mut source, token).await {
            Ok(written) => fs::rename(&partial, self.blob_path(&listing.id))
                .await
                .map(|()| written)
                .map_err(CacheError::from),
            Err(e) => Err(e),
        };
        let written = match result {
            Ok(written) => written,
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&partial).await {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        warn!("💽 Could not remove partial blob {}: {}", partial.display(), remove_err);
                    }
                }
                debug!("💽 Discarded partial blob for {}: {}", listing.id, e);
                return Err(e);
            }
        };

        self.entries
            .upsert_entry(CacheEntry::from_listing(listing, Utc::now()))
            .await?;
        info!("💾 Cached {} ({} bytes)", listing.id, written);

        if let Err(e) = self.trim().await {
            warn!("🧹 Cache trim after save failed: {}", e);
        }
        Ok(written)
    }

    async fn write_blob<S>(path: &Path, source: &mut S, token: &CancellationToken) -> Result<u64, CacheError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        let mut file = fs::File::create(path).await?;
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CacheError::Cancelled),
                next = source.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                Some(Err(e)) => return Err(CacheError::Stream(e)),
                None => break,
            }
        }

        if written == 0 {
            return Err(CacheError::Stream(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended before any data",
            )));
        }

        file.flush().await?;
        Ok(written)
    }

    /// Records with the size of their blob; records whose blob is gone count as 0 bytes.
    async fn sized_entries(&self) -> Result<Vec<SizedEntry>, CacheError> {
        let mut sized = Vec::new();
        for entry in self.entries.list_entries().await? {
            let bytes = match fs::metadata(self.blob_path(&entry.external_id)).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };
            sized.push(SizedEntry {
                external_id: entry.external_id,
                last_access: entry.last_access_date,
                bytes,
            });
        }
        Ok(sized)
    }

    /// Evicts least recently accessed entries until the cache fits its limit.
    pub async fn trim(&self) -> Result<usize, CacheError> {
        if self.limit == CacheLimit::Unbounded {
            return Ok(0);
        }

        let entries = self.sized_entries().await?;
        let victims = eviction::plan_eviction(&entries, self.limit);
        for id in &victims {
            self.remove(id).await?;
        }
        if !victims.is_empty() {
            info!("🧹 Evicted {} cached streams", victims.len());
        }
        Ok(victims.len())
    }

    async fn remove(&self, external_id: &str) -> Result<bool, CacheError> {
        let removed = self.entries.delete_entry(external_id).await?;
        match fs::remove_file(self.blob_path(external_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(removed),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes one cached stream, record and blob.
    pub async fn purge(&self, external_id: &str) -> Result<bool, CacheError> {
        let removed = self.remove(external_id).await?;
        if removed {
            info!("🗑️ Purged {} from cache", external_id);
        }
        Ok(removed)
    }

    pub async fn purge_all(&self) -> Result<usize, CacheError> {
        let mut ids: HashSet<String> = self.blobs().await?.into_keys().collect();
        ids.extend(self.entries.list_entries().await?.into_iter().map(|e| e.external_id));

        let mut purged = 0;
        for id in ids.iter().filter(|id| !self.is_in_flight(id)) {
            if self.remove(id).await? {
                purged += 1;
            }
        }
        info!("🗑️ Purged {} cached streams", purged);
        Ok(purged)
    }

    /// `.part` files whose download is no longer running.
    async fn stale_partials(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut stale = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(id) = partial_id(&name) else {
                continue;
            };
            if !self.in_flight.iter().any(|writers| file_name(writers.key()) == id) {
                stale.push(item.path());
            }
        }
        Ok(stale)
    }

    /// Blobs on disk by id, with their size and modification time.
    async fn blobs(&self) -> Result<HashMap<String, (u64, DateTime<Utc>)>, CacheError> {
        let mut blobs = HashMap::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let meta = item.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
            blobs.insert(name, (meta.len(), modified));
        }
        Ok(blobs)
    }

    /// Reconciles records with what is on disk, then trims.
    ///
    /// Records without a blob are pruned. Blobs without a record are
    /// backfilled through the metadata lookup (or a placeholder record when
    /// none is configured); blobs whose id no longer exists are deleted.
    /// Ids being written right now are left alone.
    pub async fn clean_and_validate(&self) -> Result<CacheReport, CacheError> {
        let mut report = CacheReport::default();
        for path in self.stale_partials().await? {
            match fs::remove_file(&path).await {
                Ok(()) => report.removed_partials += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let blobs = self.blobs().await?;
        let records = self.entries.list_entries().await?;

        for entry in &records {
            if !blobs.contains_key(&entry.external_id) && !self.is_in_flight(&entry.external_id) {
                self.entries.delete_entry(&entry.external_id).await?;
                report.pruned_records += 1;
            }
        }

        let known: HashSet<&str> = records.iter().map(|e| e.external_id.as_str()).collect();
        let mut orphans: Vec<(&String, &DateTime<Utc>)> = blobs
            .iter()
            .filter(|(id, _)| !known.contains(id.as_str()) && !self.is_in_flight(id))
            .map(|(id, (_, modified))| (id, modified))
            .collect();
        orphans.sort();

        for (id, modified) in orphans {
            let Some(lookup) = &self.lookup else {
                let placeholder = Listing::remote(id.clone(), id.clone(), String::new());
                self.backfill(&placeholder, *modified).await?;
                report.backfilled += 1;
                continue;
            };

            match lookup.lookup(id).await {
                Ok(Some(listing)) => {
                    let listing = Listing {
                        id: id.clone(),
                        ..listing
                    };
                    self.backfill(&listing, *modified).await?;
                    report.backfilled += 1;
                }
                Ok(None) => {
                    self.remove(id).await?;
                    report.removed_orphans += 1;
                }
                Err(e) => {
                    warn!("🔎 Metadata lookup for orphan blob {} failed: {}", id, e);
                    report.unresolved += 1;
                }
            }
        }

        report.evicted = self.trim().await?;

        let remaining = self.sized_entries().await?;
        report.remaining_items = remaining.len();
        report.remaining_bytes = remaining.iter().map(|e| e.bytes).sum();

        info!(
            "🧹 Cache validated: {} pruned, {} backfilled, {} orphans removed, {} unresolved, {} evicted, {} remaining",
            report.pruned_records,
            report.backfilled,
            report.removed_orphans,
            report.unresolved,
            report.evicted,
            report.remaining_items
        );
        Ok(report)
    }

    async fn backfill(&self, listing: &Listing, cached_at: DateTime<Utc>) -> Result<(), CacheError> {
        debug!("💽 Backfilling cache record for {}", listing.id);
        self.entries
            .upsert_entry(CacheEntry::from_listing(listing, cached_at))
            .await?;
        Ok(())
    }
}

const PARTIAL_SUFFIX: &str = ".part";

fn file_name(external_id: &str) -> String {
    external_id.replace(['/', '\\'], "_")
}

/// The id a `.<id>.<nonce>.part` file belongs to.
fn partial_id(name: &str) -> Option<&str> {
    let stem = name.strip_prefix('.')?.strip_suffix(PARTIAL_SUFFIX)?;
    stem.rsplit_once('.').map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockMetadataLookup;
    use crate::storage::JsonStorage;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: Arc<JsonStorage>,
        cache: Arc<StreamCache>,
    }

    async fn fixture(limit: CacheLimit, lookup: Option<Arc<dyn MetadataLookup>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(JsonStorage::new(dir.path().join("data")).await.unwrap());
        let cache = StreamCache::new(dir.path().join("cache"), limit, storage.clone(), lookup)
            .await
            .unwrap();
        Fixture {
            _dir: dir,
            storage,
            cache: Arc::new(cache),
        }
    }

    fn listing(id: &str) -> Listing {
        Listing::remote(id, format!("Title {id}"), format!("https://www.youtube.com/watch?v={id}"))
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn seed(f: &Fixture, id: &str, bytes: usize, accessed: DateTime<Utc>) {
        fs::write(f.cache.blob_path(id), vec![0u8; bytes]).await.unwrap();
        let mut entry = CacheEntry::from_listing(&listing(id), accessed);
        entry.last_access_date = accessed;
        f.storage.upsert_entry(entry).await.unwrap();
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let f = fixture(CacheLimit::Unbounded, None).await;

        let handle = f.cache.save(&listing("abc"), chunks(&["hello ", "world"]));
        assert_eq!(handle.join().await.unwrap(), 11);

        let path = f.cache.get("abc").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"hello world");
        assert!(!f.cache.is_in_flight("abc"));
    }

    #[tokio::test]
    async fn cancelled_save_leaves_no_blob_and_no_record() {
        let f = fixture(CacheLimit::Unbounded, None).await;
        let (tx, rx) = flume::unbounded::<io::Result<Bytes>>();
        tx.send(Ok(Bytes::from_static(b"partial"))).unwrap();

        let handle = f.cache.save(&listing("abc"), Box::pin(rx.into_stream()));
        handle.cancel();

        assert!(matches!(handle.join().await, Err(CacheError::Cancelled)));
        assert!(!f.cache.blob_path("abc").exists());
        assert!(f.storage.find_entry("abc").await.unwrap().is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn failed_stream_removes_partial_blob() {
        let f = fixture(CacheLimit::Unbounded, None).await;
        let source = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "decoder died")),
        ]);

        let handle = f.cache.save(&listing("abc"), source);

        assert!(matches!(handle.join().await, Err(CacheError::Stream(_))));
        assert!(!f.cache.blob_path("abc").exists());
        assert!(f.cache.get("abc").await.is_none());
    }

    #[tokio::test]
    async fn overlapping_saves_of_one_id_keep_the_finished_blob() {
        let f = fixture(CacheLimit::Unbounded, None).await;
        let (first_tx, first_rx) = flume::unbounded::<io::Result<Bytes>>();
        let (second_tx, second_rx) = flume::unbounded::<io::Result<Bytes>>();
        first_tx.send(Ok(Bytes::from_static(b"first"))).unwrap();
        second_tx.send(Ok(Bytes::from_static(b"second take"))).unwrap();

        let first = f.cache.save(&listing("abc"), Box::pin(first_rx.into_stream()));
        let second = f.cache.save(&listing("abc"), Box::pin(second_rx.into_stream()));

        drop(second_tx);
        assert_eq!(second.join().await.unwrap(), 11);
        assert!(f.cache.is_in_flight("abc"));

        first.cancel();
        assert!(matches!(first.join().await, Err(CacheError::Cancelled)));
        assert!(!f.cache.is_in_flight("abc"));

        let path = f.cache.get("abc").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"second take");
        assert!(f.storage.find_entry("abc").await.unwrap().is_some());
        drop(first_tx);
    }

    #[tokio::test]
    async fn clean_and_validate_removes_only_stale_partials() {
        let f = fixture(CacheLimit::Unbounded, None).await;
        let stale = f.cache.root().join(".dead.0000000000000001.part");
        let live = f.cache.root().join(".live.0000000000000002.part");
        fs::write(&stale, b"half").await.unwrap();
        fs::write(&live, b"half").await.unwrap();

        let (tx, rx) = flume::unbounded::<io::Result<Bytes>>();
        let handle = f.cache.save(&listing("live"), Box::pin(rx.into_stream()));

        let report = f.cache.clean_and_validate().await.unwrap();

        assert_eq!(report.removed_partials, 1);
        assert_eq!(report.backfilled, 0);
        assert!(!stale.exists());
        assert!(live.exists());

        handle.cancel();
        assert!(handle.join().await.is_err());
        drop(tx);
    }

    #[tokio::test]
    async fn get_prunes_record_without_blob() {
        let f = fixture(CacheLimit::Unbounded, None).await;
        seed(&f, "abc", 4, Utc::now()).await;
        fs::remove_file(f.cache.blob_path("abc")).await.unwrap();

        assert!(f.cache.get("abc").await.is_none());
        assert!(f.storage.find_entry("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_bumps_last_access() {
        let f = fixture(CacheLimit::Unbounded, None).await;
        let long_ago = Utc::now() - Duration::days(30);
        seed(&f, "abc", 4, long_ago).await;

        f.cache.get("abc").await.unwrap();

        let entry = f.storage.find_entry("abc").await.unwrap().unwrap();
        assert!(entry.last_access_date > long_ago);
    }

    #[tokio::test]
    async fn item_limit_evicts_oldest_five() {
        let f = fixture(CacheLimit::MaxItems(10), None).await;
        let base = Utc::now() - Duration::hours(1);
        for i in 0..15 {
            seed(&f, &format!("id{i:02}"), 8, base + Duration::seconds(i)).await;
        }

        assert_eq!(f.cache.trim().await.unwrap(), 5);

        let mut remaining: Vec<String> = f
            .storage
            .list_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.external_id)
            .collect();
        remaining.sort();
        let expected: Vec<String> = (5..15).map(|i| format!("id{i:02}")).collect();
        assert_eq!(remaining, expected);
        assert!(!f.cache.blob_path("id00").exists());
        assert!(f.cache.blob_path("id05").exists());
    }

    #[tokio::test]
    async fn byte_limit_is_enforced_after_save() {
        let f = fixture(CacheLimit::MaxBytes(10), None).await;
        seed(&f, "old", 8, Utc::now() - Duration::hours(1)).await;

        f.cache
            .save(&listing("new"), chunks(&["12345678"]))
            .join()
            .await
            .unwrap();

        assert!(f.storage.find_entry("old").await.unwrap().is_none());
        assert!(f.cache.get("new").await.is_some());
    }

    #[tokio::test]
    async fn clean_and_validate_is_idempotent() {
        let mut lookup = MockMetadataLookup::new();
        lookup.expect_lookup().returning(|id| match id {
            "orphan" => Ok(Some(listing("orphan").with_artist("Somebody"))),
            "gone" => Ok(None),
            _ => Err(anyhow::anyhow!("offline")),
        });
        let f = fixture(CacheLimit::Unbounded, Some(Arc::new(lookup))).await;

        seed(&f, "kept", 4, Utc::now()).await;
        seed(&f, "blobless", 4, Utc::now()).await;
        fs::remove_file(f.cache.blob_path("blobless")).await.unwrap();
        fs::write(f.cache.blob_path("orphan"), b"data").await.unwrap();
        fs::write(f.cache.blob_path("gone"), b"data").await.unwrap();
        fs::write(f.cache.blob_path("flaky"), b"data").await.unwrap();

        let first = f.cache.clean_and_validate().await.unwrap();
        assert_eq!(first.pruned_records, 1);
        assert_eq!(first.backfilled, 1);
        assert_eq!(first.removed_orphans, 1);
        assert_eq!(first.unresolved, 1);
        assert_eq!(first.remaining_items, 2);
        assert!(!f.cache.blob_path("gone").exists());

        let orphan = f.storage.find_entry("orphan").await.unwrap().unwrap();
        assert_eq!(orphan.artist.as_deref(), Some("Somebody"));

        let second = f.cache.clean_and_validate().await.unwrap();
        assert_eq!(second.remaining_items, first.remaining_items);
        assert_eq!(second.pruned_records, 0);
        assert_eq!(second.backfilled, 0);
        assert_eq!(second.unresolved, 1);
    }

    #[tokio::test]
    async fn orphans_without_lookup_get_placeholder_records() {
        let f = fixture(CacheLimit::Unbounded, None).await;
        fs::write(f.cache.blob_path("xyz"), b"data").await.unwrap();

        let report = f.cache.clean_and_validate().await.unwrap();

        assert_eq!(report.backfilled, 1);
        assert_eq!(report.remaining_bytes, 4);
        assert_eq!(f.storage.find_entry("xyz").await.unwrap().unwrap().title, "xyz");
    }

    #[tokio::test]
    async fn purge_removes_record_and_blob() {
        let f = fixture(CacheLimit::Unbounded, None).await;
        seed(&f, "a", 4, Utc::now()).await;
        seed(&f, "b", 4, Utc::now()).await;

        assert!(f.cache.purge("a").await.unwrap());
        assert!(!f.cache.purge("a").await.unwrap());
        assert_eq!(f.cache.purge_all().await.unwrap(), 1);
        assert!(f.storage.list_entries().await.unwrap().is_empty());
    }
}
