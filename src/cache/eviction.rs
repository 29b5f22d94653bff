use chrono::{DateTime, Utc};

use crate::config::CacheLimit;

/// A cache record paired with the size of its blob on disk.
#[derive(Debug, Clone)]
pub struct SizedEntry {
    pub external_id: String,
    pub last_access: DateTime<Utc>,
    pub bytes: u64,
}

/// Whether the cache is over its configured bound. Always false when unbounded.
pub fn should_trim_cache(limit: CacheLimit, items: usize, bytes: u64) -> bool {
    match limit {
        CacheLimit::Unbounded => false,
        CacheLimit::MaxBytes(max) => bytes > max,
        CacheLimit::MaxItems(max) => items > max,
    }
}

/// Ids to evict, least recently accessed first, so the rest fits under `limit`.
pub fn plan_eviction(entries: &[SizedEntry], limit: CacheLimit) -> Vec<String> {
    let total_bytes: u64 = entries.iter().map(|e| e.bytes).sum();
    if !should_trim_cache(limit, entries.len(), total_bytes) {
        return Vec::new();
    }

    let mut oldest_first: Vec<&SizedEntry> = entries.iter().collect();
    oldest_first.sort_by_key(|e| e.last_access);

    match limit {
        CacheLimit::Unbounded => Vec::new(),
        CacheLimit::MaxItems(max) => oldest_first
            .iter()
            .take(entries.len().saturating_sub(max))
            .map(|e| e.external_id.clone())
            .collect(),
        CacheLimit::MaxBytes(max) => {
            let mut projected = total_bytes;
            oldest_first
                .iter()
                .take_while(|e| {
                    let over = projected > max;
                    if over {
                        projected -= e.bytes;
                    }
                    over
                })
                .map(|e| e.external_id.clone())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn entries(sizes: &[u64]) -> Vec<SizedEntry> {
        let base = Utc::now();
        sizes
            .iter()
            .enumerate()
            .map(|(i, bytes)| SizedEntry {
                external_id: format!("id{i}"),
                last_access: base + Duration::seconds(i as i64),
                bytes: *bytes,
            })
            .collect()
    }

    #[test]
    fn unbounded_never_trims() {
        assert!(!should_trim_cache(CacheLimit::Unbounded, 10_000, u64::MAX));
        assert!(plan_eviction(&entries(&[1, 2, 3]), CacheLimit::Unbounded).is_empty());
    }

    #[test]
    fn item_limit_drops_oldest() {
        let mut all = entries(&[1; 7]);
        all.reverse();

        let evicted = plan_eviction(&all, CacheLimit::MaxItems(4));

        assert_eq!(evicted, vec!["id0", "id1", "id2"]);
    }

    #[test]
    fn byte_limit_drops_until_under_ceiling() {
        let all = entries(&[40, 30, 20, 10]);

        assert_eq!(plan_eviction(&all, CacheLimit::MaxBytes(35)), vec!["id0", "id1"]);
        assert!(plan_eviction(&all, CacheLimit::MaxBytes(100)).is_empty());
    }
}
