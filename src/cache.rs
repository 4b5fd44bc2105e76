//! Query-result cache
//!
//! Maps a query id to the SQL that produced it, a bounded preview, and a row
//! count that never needs a full scan. Entries are built completely before
//! they are inserted, so a reader sees either nothing or the whole entry.
//!
//! Counting reads at most `preview_rows + 1` rows from the execution stream.
//! When that is not enough to know the total, the driver's own count is used
//! if it reported one, otherwise a bounded probe (`probe_count`) that looks at
//! no more than `max_cache_rows + 1` rows.

use crate::config::CacheConfig;
use crate::db::{DatabaseGateway, Row, RowCount, RowStream};
use crate::error::{Result, SageError};
use crate::interpret::Interpretation;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Read-only snapshot of a cached result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub query_id: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub preview: Vec<Row>,
    pub total: RowCount,
    pub created_at: DateTime<Utc>,
    pub interpretation: Option<Interpretation>,
}

struct Slot {
    query_id: String,
    sql: String,
    columns: Vec<String>,
    preview: Vec<Row>,
    total: RowCount,
    created_at: DateTime<Utc>,
    created: Instant,
    interpretation: OnceCell<Interpretation>,
    /// Logical access stamp; larger is more recent
    last_access: AtomicU64,
}

impl Slot {
    fn snapshot(&self) -> CacheEntry {
        CacheEntry {
            query_id: self.query_id.clone(),
            sql: self.sql.clone(),
            columns: self.columns.clone(),
            preview: self.preview.clone(),
            total: self.total,
            created_at: self.created_at,
            interpretation: self.interpretation.get().cloned(),
        }
    }
}

pub struct ResultCache {
    config: CacheConfig,
    slots: DashMap<String, Arc<Slot>>,
    clock: AtomicU64,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Read the preview from `stream`, settle the row count and store a new
    /// entry. Returns the freshly minted query id.
    pub async fn populate(&self, sql: &str, stream: RowStream, prober: &dyn DatabaseGateway) -> Result<String> {
        let preview_cap = self.config.preview_rows;
        let ceiling = self.config.max_cache_rows;

        let RowStream {
            columns,
            mut rows,
            reported_total,
        } = stream;

        let mut preview: Vec<Row> = Vec::with_capacity(preview_cap + 1);
        let mut exhausted = false;
        while preview.len() <= preview_cap {
            match rows.next().await {
                Some(row) => preview.push(row?),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        // The rest of the result is never pulled.
        drop(rows);

        let read = preview.len() as u64;
        let total = if exhausted {
            RowCount::Exact(read)
        } else if read > ceiling {
            RowCount::MoreThan(ceiling)
        } else if let Some(reported) = reported_total {
            RowCount::capped(reported, ceiling)
        } else {
            debug!("Preview of {} rows did not exhaust the result, probing count", read);
            prober.probe_count(sql, ceiling).await?
        };
        preview.truncate(preview_cap);

        let query_id = Uuid::new_v4().to_string();
        let slot = Slot {
            query_id: query_id.clone(),
            sql: sql.to_string(),
            columns,
            preview,
            total,
            created_at: Utc::now(),
            created: Instant::now(),
            interpretation: OnceCell::new(),
            last_access: AtomicU64::new(self.tick()),
        };
        info!(
            "Cached query {} ({} preview rows, total {})",
            query_id,
            slot.preview.len(),
            slot.total
        );
        self.slots.insert(query_id.clone(), Arc::new(slot));

        self.evict_expired();
        Ok(query_id)
    }

    fn slot(&self, query_id: &str) -> Result<Arc<Slot>> {
        let slot = self
            .slots
            .get(query_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| SageError::NotFound(query_id.to_string()))?;
        slot.last_access.store(self.tick(), Ordering::Relaxed);
        Ok(slot)
    }

    pub fn get(&self, query_id: &str) -> Result<CacheEntry> {
        Ok(self.slot(query_id)?.snapshot())
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.slots.contains_key(query_id)
    }

    /// Store `interpretation` unless one is already present; returns the stored value.
    pub async fn memoize_interpretation(
        &self,
        query_id: &str,
        interpretation: Interpretation,
    ) -> Result<Interpretation> {
        let slot = self.slot(query_id)?;
        let stored = slot.interpretation.get_or_init(|| async move { interpretation }).await;
        Ok(stored.clone())
    }

    /// Return the stored interpretation, computing it at most once per id.
    ///
    /// Concurrent callers wait for the first computation. A failed
    /// computation stores nothing and the next caller tries again.
    pub async fn interpretation_or_compute<F, Fut>(&self, query_id: &str, compute: F) -> Result<Interpretation>
    where
        F: FnOnce(CacheEntry) -> Fut,
        Fut: Future<Output = Result<Interpretation>>,
    {
        let slot = self.slot(query_id)?;
        let entry = slot.snapshot();
        let stored = slot.interpretation.get_or_try_init(|| compute(entry)).await?;
        Ok(stored.clone())
    }

    /// Remove an entry. Returns whether anything was removed.
    pub fn invalidate(&self, query_id: &str) -> bool {
        let removed = self.slots.remove(query_id).is_some();
        if removed {
            info!("Invalidated cached query {}", query_id);
        }
        removed
    }

    /// Drop entries past the retention window, then least-recently-used
    /// entries until the cache is within `max_entries`.
    pub fn evict_expired(&self) -> usize {
        let retention = self.config.retention;
        let now = Instant::now();

        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|s| now.saturating_duration_since(s.value().created) > retention)
            .map(|s| s.key().clone())
            .collect();
        let mut evicted = 0;
        for id in expired {
            let removed = self
                .slots
                .remove_if(&id, |_, slot| now.saturating_duration_since(slot.created) > retention);
            if removed.is_some() {
                evicted += 1;
            }
        }

        if self.slots.len() > self.config.max_entries {
            let mut by_access: Vec<(u64, String)> = self
                .slots
                .iter()
                .map(|s| (s.value().last_access.load(Ordering::Relaxed), s.key().clone()))
                .collect();
            by_access.sort_unstable();
            for (stamp, id) in by_access {
                if self.slots.len() <= self.config.max_entries {
                    break;
                }
                // Spare an entry that was read after the scan.
                let removed = self
                    .slots
                    .remove_if(&id, |_, slot| slot.last_access.load(Ordering::Relaxed) == stamp);
                if removed.is_some() {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            info!("Evicted {} cached queries ({} remain)", evicted, self.slots.len());
        }
        evicted
    }

    /// Periodically run `evict_expired` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.evict_expired();
                    }
                    None => break,
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
