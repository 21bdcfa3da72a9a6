//! TTL cache for layout measurements.
//!
//! Entries expire `ttl` milliseconds after insertion (per-entry override allowed).
//! Expired entries are dropped lazily on read and eagerly by `cleanup`. When the
//! cache is full, inserting a new key first evicts the globally oldest entry.
//! `evict_lru` removes the least-accessed entries but is never called implicitly.
//!
//! This type is single-owner (`&mut self`). Concurrent use goes through
//! [`crate::measurement::shared::SharedMeasurementCache`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
#[cfg(test)]
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Clock
// ────────────────────────────────────────────────────────────────────────────

/// Millisecond wall clock used for entry timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

#[cfg(test)]
impl ManualClock {
    pub fn at(ms: i64) -> Self {
        Self(AtomicI64::new(ms))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_size: usize,
    pub cleanup_interval: Duration,
    pub enable_stats: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size: 1000,
            cleanup_interval: Duration::from_secs(60),
            enable_stats: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    timestamp: i64,
    ttl_ms: Option<i64>,
    access_count: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    total_saved_ms: f64,
}

/// Point-in-time statistics. Rates are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_saved_ms: f64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    pub utilization: f64,
}

/// Serializable cache contents.
///
/// `ttl` carries per-entry TTL overrides in milliseconds; older snapshots without
/// it import with the default TTL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    #[serde(default)]
    pub cache: BTreeMap<String, Value>,
    #[serde(default)]
    pub timestamps: BTreeMap<String, i64>,
    #[serde(default)]
    pub access_count: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ttl: BTreeMap<String, i64>,
}

/// Warm-up row: inserted only if `key` is not already cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupEntry<V> {
    pub key: String,
    pub value: V,
    /// TTL override in milliseconds.
    #[serde(default)]
    pub ttl: Option<u64>,
}

// ────────────────────────────────────────────────────────────────────────────
// Cache
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MeasurementCache<V> {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry<V>>,
    counters: Counters,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> MeasurementCache<V> {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(
            ttl_ms = config.ttl.as_millis() as u64,
            max_size = config.max_size,
            "measurement cache initialized"
        );
        Self {
            config,
            entries: HashMap::new(),
            counters: Counters::default(),
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Builds `"{kind}#k1:v1|k2:v2"` with params sorted by key.
    pub fn generate_key(kind: &str, params: &[(&str, String)]) -> String {
        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("|");
        format!("{kind}#{joined}")
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_size {
            self.evict_oldest();
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                timestamp: self.clock.now_ms(),
                ttl_ms: ttl.map(|t| t.as_millis() as i64),
                access_count: 0,
            },
        );
        debug!(key = %key, "cache set");
    }

    /// Returns a clone of the cached value, or `None` when absent or expired.
    ///
    /// Expired reads count as a miss and an expiration, and drop the entry.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        match self.entries.get(key).map(|e| self.is_expired(e, now)) {
            None => {
                self.record(|c| c.misses += 1);
                None
            }
            Some(true) => {
                self.entries.remove(key);
                self.record(|c| {
                    c.misses += 1;
                    c.expirations += 1;
                });
                None
            }
            Some(false) => {
                self.record(|c| c.hits += 1);
                let entry = self.entries.get_mut(key)?;
                entry.access_count += 1;
                Some(entry.value.clone())
            }
        }
    }

    /// Read without touching statistics or access counts.
    #[cfg(test)]
    pub fn peek(&self, key: &str) -> Option<&V> {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .filter(|e| !self.is_expired(e, now))
            .map(|e| &e.value)
    }

    #[cfg(test)]
    pub fn contains_key(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: i64) -> bool {
        let ttl = entry
            .ttl_ms
            .unwrap_or(self.config.ttl.as_millis() as i64);
        now - entry.timestamp > ttl
    }

    /// Purges every expired entry. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        if !expired.is_empty() {
            let count = expired.len() as u64;
            self.record(|c| c.expirations += count);
            debug!(purged = expired.len(), "cache cleanup");
        }
        expired.len()
    }

    /// Evicts the entry with the oldest insertion timestamp.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by(|(ka, a), (kb, b)| a.timestamp.cmp(&b.timestamp).then_with(|| ka.cmp(kb)))
            .map(|(k, _)| k.clone())?;
        self.entries.remove(&oldest);
        self.record(|c| c.evictions += 1);
        debug!(key = %oldest, "cache eviction (oldest)");
        Some(oldest)
    }

    /// Evicts the `count` least-accessed entries (ties broken by age).
    pub fn evict_lru(&mut self, count: usize) -> Vec<String> {
        let mut ranked: Vec<(&String, &CacheEntry<V>)> = self.entries.iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| {
            a.access_count
                .cmp(&b.access_count)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
                .then_with(|| ka.cmp(kb))
        });
        let victims: Vec<String> = ranked
            .into_iter()
            .take(count)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &victims {
            self.entries.remove(key);
            debug!(key = %key, "cache eviction (lru)");
        }
        let evicted = victims.len() as u64;
        self.record(|c| c.evictions += evicted);
        victims
    }

    /// Drops every entry and resets statistics.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.counters = Counters::default();
        debug!("cache cleared");
    }

    pub fn record_saved(&mut self, saved: Duration) {
        self.record(|c| c.total_saved_ms += saved.as_secs_f64() * 1000.0);
    }

    pub fn stats(&self) -> CacheStats {
        let c = self.counters;
        let lookups = c.hits + c.misses;
        CacheStats {
            hits: c.hits,
            misses: c.misses,
            evictions: c.evictions,
            expirations: c.expirations,
            total_saved_ms: c.total_saved_ms,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                c.hits as f64 / lookups as f64
            },
            size: self.entries.len(),
            max_size: self.config.max_size,
            utilization: if self.config.max_size == 0 {
                0.0
            } else {
                self.entries.len() as f64 / self.config.max_size as f64
            },
        }
    }

    pub fn warmup(&mut self, entries: Vec<WarmupEntry<V>>) -> usize {
        let mut warmed = 0;
        for entry in entries {
            if !self.entries.contains_key(&entry.key) {
                self.set(entry.key, entry.value, entry.ttl.map(Duration::from_millis));
                warmed += 1;
            }
        }
        debug!(warmed, "cache warmed up");
        warmed
    }

    fn record(&mut self, update: impl FnOnce(&mut Counters)) {
        if self.config.enable_stats {
            update(&mut self.counters);
        }
    }
}

impl<V: Clone + Serialize> MeasurementCache<V> {
    /// Exports values, timestamps and access counts verbatim.
    ///
    /// Values that cannot be represented as JSON are left out of the snapshot
    /// together with their metadata.
    pub fn export(&self) -> CacheSnapshot {
        let mut snapshot = CacheSnapshot::default();
        for (key, entry) in &self.entries {
            let value = match serde_json::to_value(&entry.value) {
                Ok(value) => value,
                Err(e) => {
                    debug!(key = %key, error = %e, "cache entry not exportable; skipped");
                    continue;
                }
            };
            snapshot.cache.insert(key.clone(), value);
            snapshot.timestamps.insert(key.clone(), entry.timestamp);
            snapshot.access_count.insert(key.clone(), entry.access_count);
            if let Some(ttl) = entry.ttl_ms {
                snapshot.ttl.insert(key.clone(), ttl);
            }
        }
        snapshot
    }
}

impl<V: Clone + DeserializeOwned> MeasurementCache<V> {
    /// Replaces the cache contents with a snapshot. Returns the number of entries restored.
    ///
    /// Rows without a timestamp or with an undecodable value are skipped.
    pub fn import(&mut self, snapshot: CacheSnapshot) -> usize {
        self.clear();
        let CacheSnapshot {
            cache,
            timestamps,
            access_count,
            ttl,
        } = snapshot;
        for (key, raw) in cache {
            let Some(&timestamp) = timestamps.get(&key) else {
                continue;
            };
            let Ok(value) = serde_json::from_value::<V>(raw) else {
                debug!(key = %key, "cache snapshot value not decodable; skipped");
                continue;
            };
            let entry = CacheEntry {
                value,
                timestamp,
                ttl_ms: ttl.get(&key).copied(),
                access_count: access_count.get(&key).copied().unwrap_or(0),
            };
            self.entries.insert(key, entry);
        }
        debug!(entries = self.entries.len(), "cache imported");
        self.entries.len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(max_size: usize, ttl_ms: u64) -> (MeasurementCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(1_000_000));
        let config = CacheConfig {
            ttl: Duration::from_millis(ttl_ms),
            max_size,
            ..CacheConfig::default()
        };
        (MeasurementCache::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_generate_key_sorts_params() {
        let key = MeasurementCache::<u32>::generate_key(
            "module-title",
            &[("width", "674".to_string()), ("module", "0".to_string())],
        );
        assert_eq!(key, "module-title#module:0|width:674");
        assert_eq!(MeasurementCache::<u32>::generate_key("x", &[]), "x#");
    }

    #[test]
    fn test_ttl_boundary_and_counters() {
        let (mut cache, clock) = cache_with(10, 1000);
        cache.set("a", 7, None);

        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get("a"), Some(7));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 0));

        clock.advance(Duration::from_millis(2));
        assert_eq!(cache.get("a"), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.expirations), (1, 1, 1));
        assert!(cache.is_empty(), "expired entry is purged on read");
    }

    #[test]
    fn test_entry_visible_exactly_at_ttl() {
        let (mut cache, clock) = cache_with(10, 1000);
        cache.set("a", 1, None);
        clock.advance(Duration::from_millis(1000));
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_custom_ttl_overrides_default() {
        let (mut cache, clock) = cache_with(10, 1000);
        cache.set("short", 1, Some(Duration::from_millis(10)));
        cache.set("long", 2, Some(Duration::from_millis(5000)));
        clock.advance(Duration::from_millis(2000));
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[test]
    fn test_size_bound_evicts_globally_oldest() {
        let (mut cache, clock) = cache_with(3, 60_000);
        for (i, key) in ["k0", "k1", "k2", "k3"].iter().enumerate() {
            cache.set(*key, i as u32, None);
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains_key("k0"));
        assert!(cache.contains_key("k3"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let (mut cache, clock) = cache_with(2, 60_000);
        cache.set("a", 1, None);
        clock.advance(Duration::from_millis(1));
        cache.set("b", 2, None);
        cache.set("b", 3, None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), Some(3));
    }

    #[test]
    fn test_evict_lru_removes_least_accessed() {
        let (mut cache, _clock) = cache_with(10, 60_000);
        cache.set("hot", 1, None);
        cache.set("warm", 2, None);
        cache.set("cold", 3, None);
        for _ in 0..3 {
            cache.get("hot");
        }
        cache.get("warm");
        let evicted = cache.evict_lru(1);
        assert_eq!(evicted, vec!["cold".to_string()]);
        assert!(cache.contains_key("hot"));
        assert!(cache.contains_key("warm"));
    }

    #[test]
    fn test_cleanup_purges_only_expired() {
        let (mut cache, clock) = cache_with(10, 1000);
        cache.set("old", 1, None);
        clock.advance(Duration::from_millis(800));
        cache.set("new", 2, None);
        clock.advance(Duration::from_millis(300));
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("new"));
    }

    #[test]
    fn test_clear_resets_everything() {
        let (mut cache, _clock) = cache_with(10, 1000);
        cache.set("a", 1, None);
        cache.get("a");
        cache.get("b");
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[test]
    fn test_stats_rates() {
        let (mut cache, _clock) = cache_with(4, 1000);
        assert_eq!(cache.stats().hit_rate, 0.0);
        cache.set("a", 1, None);
        cache.get("a");
        cache.get("missing");
        let stats = cache.stats();
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
        assert!((stats.utilization - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_stats_stay_zero() {
        let clock = Arc::new(ManualClock::at(0));
        let config = CacheConfig {
            enable_stats: false,
            ..CacheConfig::default()
        };
        let mut cache: MeasurementCache<u32> = MeasurementCache::new(config, clock);
        cache.set("a", 1, None);
        cache.get("a");
        cache.get("b");
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_export_import_round_trip_preserves_metadata() {
        let (mut cache, clock) = cache_with(10, 1000);
        cache.set("a", 1, None);
        cache.set("b", 2, Some(Duration::from_millis(50)));
        cache.get("a");
        cache.get("a");
        let snapshot = cache.export();
        assert_eq!(snapshot.access_count["a"], 2);
        assert_eq!(snapshot.ttl["b"], 50);

        let mut restored: MeasurementCache<u32> =
            MeasurementCache::new(*cache.config(), clock.clone());
        assert_eq!(restored.import(snapshot.clone()), 2);
        assert_eq!(restored.export(), snapshot);
    }

    #[test]
    fn test_import_skips_rows_without_timestamp() {
        let (mut cache, _clock) = cache_with(10, 1000);
        let mut snapshot = CacheSnapshot::default();
        snapshot.cache.insert("a".into(), serde_json::json!(1));
        snapshot.cache.insert("b".into(), serde_json::json!(2));
        snapshot.timestamps.insert("a".into(), 1_000_000);
        assert_eq!(cache.import(snapshot), 1);
        assert_eq!(cache.peek("a"), Some(&1));
    }

    #[derive(Debug, Clone, Serialize)]
    enum Probe {
        Plain(u32),
        Keyed(HashMap<(u8, u8), u8>),
    }

    #[test]
    fn test_export_drops_unrepresentable_values() {
        let clock = Arc::new(ManualClock::at(0));
        let mut cache: MeasurementCache<Probe> = MeasurementCache::new(CacheConfig::default(), clock);
        let mut keyed = HashMap::new();
        keyed.insert((1, 2), 3);
        cache.set("plain", Probe::Plain(4), None);
        cache.set("keyed", Probe::Keyed(keyed), None);
        let snapshot = cache.export();
        assert_eq!(snapshot.cache.len(), 1);
        assert!(snapshot.cache.contains_key("plain"));
        assert!(!snapshot.timestamps.contains_key("keyed"));
    }

    #[test]
    fn test_warmup_skips_existing_keys() {
        let (mut cache, _clock) = cache_with(10, 1000);
        cache.set("a", 1, None);
        let warmed = cache.warmup(vec![
            WarmupEntry { key: "a".into(), value: 100, ttl: None },
            WarmupEntry { key: "b".into(), value: 2, ttl: Some(10) },
        ]);
        assert_eq!(warmed, 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), Some(2));
    }
}
