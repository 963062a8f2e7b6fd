//! Content-addressed extraction cache with single-flight coalescing.
//!
//! Key = SHA-256(source-tag || prompt-version || raw text). Concurrent
//! callers for the same key share one upstream LLM invocation: the first
//! caller runs the computation inside the slot's `OnceCell`, the rest
//! await its result. Entries expire after the TTL and the entry count is
//! bounded with approximate LRU eviction. Durability across restarts is
//! intentionally not provided.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use super::models::ExtractionResult;
use crate::utils::{IngestError, sha256_hex};

/// Compose the cache key for one extraction call.
pub fn extraction_cache_key(source_tag: &str, prompt_version: &str, text: &str) -> String {
    sha256_hex(&format!("{source_tag}\u{1f}{prompt_version}\u{1f}{text}"))
}

#[derive(Clone)]
struct StoredExtraction {
    value: ExtractionResult,
    stored_at: Instant,
}

struct CacheSlot {
    cell: Arc<OnceCell<StoredExtraction>>,
    /// Monotonic sequence of the last touch, for LRU ranking
    last_access: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ExtractionCache {
    entries: DashMap<String, Arc<CacheSlot>>,
    ttl: Duration,
    max_entries: usize,
    access_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ExtractionCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            access_seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache-aside lookup with single-flight: at most one execution of
    /// `compute` per live key. Failed computations are not cached; the next
    /// caller retries.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<ExtractionResult, IngestError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ExtractionResult, IngestError>>,
    {
        loop {
            let slot = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(CacheSlot {
                        cell: Arc::new(OnceCell::new()),
                        last_access: AtomicU64::new(0),
                    })
                })
                .clone();

            let was_initialized = slot.cell.initialized();
            let stored = slot
                .cell
                .get_or_try_init(|| async {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("extraction_cache_misses_total", 1);
                    let value = compute().await?;
                    Ok::<_, IngestError>(StoredExtraction { value, stored_at: Instant::now() })
                })
                .await?
                .clone();

            if stored.stored_at.elapsed() >= self.ttl {
                // Expired; drop this slot (but not a racer's replacement)
                // and recompute fresh.
                self.entries.remove_if(key, |_, existing| Arc::ptr_eq(existing, &slot));
                continue;
            }

            if was_initialized {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("extraction_cache_hits_total", 1);
            }
            slot.last_access
                .store(self.access_seq.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);

            self.evict_over_capacity();
            return Ok(stored.value);
        }
    }

    /// Peek without computing.
    pub fn get(&self, key: &str) -> Option<ExtractionResult> {
        let slot = self.entries.get(key)?;
        let stored = slot.cell.get()?;
        if stored.stored_at.elapsed() >= self.ttl {
            return None;
        }
        slot.last_access
            .store(self.access_seq.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(stored.value.clone())
    }

    /// Drop expired entries; run periodically from a maintenance task.
    pub fn prune_expired(&self) {
        self.entries.retain(|_, slot| match slot.cell.get() {
            Some(stored) => stored.stored_at.elapsed() < self.ttl,
            // In-flight computations stay
            None => true,
        });
    }

    /// Approximate LRU: when over capacity, drop the least recently
    /// touched completed entries down to the bound.
    fn evict_over_capacity(&self) {
        let len = self.entries.len();
        if len <= self.max_entries {
            return;
        }

        let mut candidates: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter(|entry| entry.value().cell.initialized())
            .map(|entry| (entry.key().clone(), entry.value().last_access.load(Ordering::Relaxed)))
            .collect();
        candidates.sort_by_key(|(_, access)| *access);

        let excess = len.saturating_sub(self.max_entries);
        for (key, _) in candidates.into_iter().take(excess) {
            self.entries.remove(&key);
            metrics::counter!("extraction_cache_evictions_total", 1);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
