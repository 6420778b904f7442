// Per-widget data cache with epoch tagging
//
// Every fetch takes a `FetchTicket` carrying the cache epoch at issue time.
// Invalidation bumps the epoch, so a fetch that was in flight when its
// widget (or the whole cache) was invalidated cannot write its result back:
// - invalidate(widget): tickets for that widget issued before it go stale
// - invalidate_all():   every ticket issued before it goes stale
// - a result never replaces one stored from a newer ticket
//
// In-flight fetches are never cancelled; their results are just dropped.

use crate::query::ChartData;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Handle for one fetch, to be presented back to `store`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    widget_id: String,
    epoch: u64,
}

impl FetchTicket {
    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

struct CacheEntry {
    data: ChartData,
    epoch: u64,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Results discarded because their ticket was stale
    pub rejected: u64,
    pub entries: usize,
}

pub struct DataCache {
    enabled: bool,
    entries: HashMap<String, CacheEntry>,
    epoch: u64,
    /// Epoch of the last invalidate_all
    cleared_at: u64,
    /// Epoch of the last invalidation per widget
    invalidated_at: HashMap<String, u64>,
    hits: u64,
    misses: u64,
    rejected: u64,
}

impl DataCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
            epoch: 0,
            cleared_at: 0,
            invalidated_at: HashMap::new(),
            hits: 0,
            misses: 0,
            rejected: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Tag a fetch for `widget_id` with the current epoch
    pub fn begin_fetch(&self, widget_id: &str) -> FetchTicket {
        FetchTicket {
            widget_id: widget_id.to_string(),
            epoch: self.epoch,
        }
    }

    /// Cached data for a widget, counting the hit or miss
    pub fn get(&mut self, widget_id: &str) -> Option<ChartData> {
        if !self.enabled {
            return None;
        }
        match self.entries.get(widget_id) {
            Some(entry) => {
                self.hits += 1;
                debug!(
                    "Cache hit for widget {} (age {:?})",
                    widget_id,
                    entry.stored_at.elapsed()
                );
                Some(entry.data.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, widget_id: &str) -> bool {
        self.entries.contains_key(widget_id)
    }

    /// True when a result fetched under `ticket` may still be stored
    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        if ticket.epoch < self.cleared_at {
            return false;
        }
        if let Some(&at) = self.invalidated_at.get(&ticket.widget_id) {
            if ticket.epoch < at {
                return false;
            }
        }
        match self.entries.get(&ticket.widget_id) {
            Some(entry) => entry.epoch <= ticket.epoch,
            None => true,
        }
    }

    /// Store a fetch result; returns false (and drops the data) when the
    /// ticket is stale or the cache is disabled
    pub fn store(&mut self, ticket: FetchTicket, data: ChartData) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.is_current(&ticket) {
            self.rejected += 1;
            debug!(
                "Discarding stale result for widget {} (epoch {} < {})",
                ticket.widget_id, ticket.epoch, self.epoch
            );
            return false;
        }

        self.entries.insert(
            ticket.widget_id,
            CacheEntry {
                data,
                epoch: ticket.epoch,
                stored_at: Instant::now(),
            },
        );
        true
    }

    pub fn invalidate(&mut self, widget_id: &str) {
        self.epoch += 1;
        self.invalidated_at.insert(widget_id.to_string(), self.epoch);
        self.entries.remove(widget_id);
    }

    /// Invalidate several widgets under one epoch bump
    pub fn invalidate_many<'a, I>(&mut self, widget_ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.epoch += 1;
        for id in widget_ids {
            self.entries.remove(id);
            self.invalidated_at.insert(id.to_string(), self.epoch);
        }
    }

    /// Drop every entry and make every outstanding ticket stale
    pub fn invalidate_all(&mut self) {
        self.epoch += 1;
        self.cleared_at = self.epoch;
        self.invalidated_at.clear();
        self.entries.clear();
        debug!("Cache cleared at epoch {}", self.epoch);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            rejected: self.rejected,
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Row;

    fn chart(label: &str) -> ChartData {
        ChartData {
            rows: vec![Row::new().with("region", label)],
            x_field: "region".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_store_and_get() {
        let mut cache = DataCache::new(true);
        assert!(cache.get("w1").is_none());

        let ticket = cache.begin_fetch("w1");
        assert!(cache.store(ticket, chart("N")));
        assert_eq!(cache.get("w1"), Some(chart("N")));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_stale_fetch_after_invalidate_all_is_rejected() {
        let mut cache = DataCache::new(true);
        let stale = cache.begin_fetch("w1");

        cache.invalidate_all();
        let fresh = cache.begin_fetch("w1");
        assert!(cache.store(fresh, chart("new")));

        assert!(!cache.store(stale, chart("old")));
        assert_eq!(cache.get("w1"), Some(chart("new")));
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_stale_fetch_rejected_even_if_it_lands_first() {
        let mut cache = DataCache::new(true);
        let stale = cache.begin_fetch("w1");
        cache.invalidate_all();

        assert!(!cache.store(stale, chart("old")));
        assert!(!cache.contains("w1"));
    }

    #[test]
    fn test_widget_invalidation_is_scoped() {
        let mut cache = DataCache::new(true);
        let t1 = cache.begin_fetch("w1");
        let t2 = cache.begin_fetch("w2");

        cache.invalidate("w1");
        assert!(!cache.store(t1, chart("a")));
        assert!(cache.store(t2, chart("b")));
    }

    #[test]
    fn test_invalidate_many() {
        let mut cache = DataCache::new(true);
        for id in ["w1", "w2", "w3"] {
            let t = cache.begin_fetch(id);
            cache.store(t, chart(id));
        }
        let in_flight = cache.begin_fetch("w4");

        cache.invalidate_many(["w1", "w3", "w4"]);
        assert!(!cache.store(in_flight, chart("w4")));
        assert!(!cache.contains("w1"));
        assert!(cache.contains("w2"));
        assert!(!cache.contains("w3"));
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let mut cache = DataCache::new(false);
        let t = cache.begin_fetch("w1");
        assert!(!cache.store(t, chart("N")));
        assert!(cache.get("w1").is_none());
    }
}
