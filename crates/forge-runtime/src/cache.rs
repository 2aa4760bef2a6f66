//! `IntentCache` (§4.6): hash-keyed memoization of `(input, context) →
//! IR`, TTL + LRU eviction, lazy JSON snapshot. No teacher analogue;
//! authored fresh using `dashmap` per the same per-component-lock
//! discipline as `ResilienceKit`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use forge_common::{CacheEntry, IntentIr};
use sha2::{Digest, Sha256};

const DEFAULT_TTL_SECONDS: i64 = 3600;
const DEFAULT_MAX_ENTRIES: usize = 500;
const SNAPSHOT_WRITE_INTERVAL: u64 = 20;

/// Stable key over `normalize(user_input) ⊕ context_fingerprint`.
/// `normalize` = trim + lowercase; the fingerprint is any caller-supplied
/// digest (cwd + top-N frequent paths + profile name, computed upstream).
pub fn cache_key(user_input: &str, context_fingerprint: &str) -> String {
    let normalized = user_input.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"\0");
    hasher.update(context_fingerprint.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct IntentCacheConfig {
    pub ttl_seconds: i64,
    pub max_entries: usize,
}

impl Default for IntentCacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: DEFAULT_TTL_SECONDS, max_entries: DEFAULT_MAX_ENTRIES }
    }
}

pub struct IntentCache {
    config: IntentCacheConfig,
    entries: DashMap<String, CacheEntry>,
    snapshot_path: PathBuf,
    writes_since_snapshot: AtomicU64,
}

impl IntentCache {
    pub fn open(state_root: &Path, config: IntentCacheConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(state_root)?;
        let snapshot_path = state_root.join("intent_cache.json");
        let entries = DashMap::new();
        if snapshot_path.exists() {
            let content = std::fs::read_to_string(&snapshot_path)?;
            if !content.trim().is_empty() {
                let loaded: Vec<CacheEntry> = serde_json::from_str(&content)?;
                for entry in loaded {
                    entries.insert(entry.key_hash.clone(), entry);
                }
            }
        }
        Ok(Self { config, entries, snapshot_path, writes_since_snapshot: AtomicU64::new(0) })
    }

    pub fn in_memory(config: IntentCacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            snapshot_path: PathBuf::from("intent_cache.json"),
            writes_since_snapshot: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Hit: touch `last_used`, return a clone. Miss: call `translate_fn`,
    /// insert with a fresh TTL, evict-oldest if over `max_entries`.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, translate_fn: F) -> anyhow::Result<IntentIr>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<IntentIr>>,
    {
        let now = Utc::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.touch();
                return Ok(entry.ir.clone());
            }
        }

        let ir = translate_fn().await?;
        self.insert(key, ir.clone())?;
        Ok(ir)
    }

    fn insert(&self, key: &str, ir: IntentIr) -> anyhow::Result<()> {
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(key) {
            self.evict_oldest();
        }
        self.entries.insert(key.to_string(), CacheEntry::new(key, ir, self.config.ttl_seconds));
        self.maybe_snapshot()?;
        Ok(())
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.last_used)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Remove every key whose hash starts with `prefix`.
    pub fn invalidate(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }

    fn maybe_snapshot(&self) -> anyhow::Result<()> {
        let count = self.writes_since_snapshot.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= SNAPSHOT_WRITE_INTERVAL {
            self.writes_since_snapshot.store(0, Ordering::SeqCst);
            self.persist()?;
        }
        Ok(())
    }

    /// Force a snapshot write; called at process exit regardless of the
    /// periodic counter.
    pub fn persist(&self) -> anyhow::Result<()> {
        let snapshot: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&self.snapshot_path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn ir() -> IntentIr {
        IntentIr::new("test goal", false, vec![])
    }

    #[tokio::test]
    async fn miss_then_hit_calls_translate_fn_once() {
        let cache = IntentCache::in_memory(IntentCacheConfig::default());
        let calls = AtomicU32::new(0);
        let key = cache_key("do the thing", "ctx-a");

        let r1 = cache.get_or_compute(&key, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok(ir()) }
        }).await.unwrap();
        let r2 = cache.get_or_compute(&key, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok(ir()) }
        }).await.unwrap();

        assert_eq!(r1.goal, r2.goal);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1, "second call must be a cache hit");
    }

    #[tokio::test]
    async fn expired_entry_is_recomputed() {
        let cache = IntentCache::in_memory(IntentCacheConfig { ttl_seconds: -1, max_entries: 10 });
        let key = cache_key("stale", "ctx");
        cache.get_or_compute(&key, || async { Ok(ir()) }).await.unwrap();
        let calls = AtomicU32::new(0);
        cache.get_or_compute(&key, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok(ir()) }
        }).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1, "negative TTL means always-expired");
    }

    #[tokio::test]
    async fn eviction_drops_oldest_when_over_capacity() {
        let cache = IntentCache::in_memory(IntentCacheConfig { ttl_seconds: 3600, max_entries: 2 });
        for i in 0..3 {
            let key = cache_key(&format!("goal-{i}"), "ctx");
            cache.get_or_compute(&key, || async { Ok(ir()) }).await.unwrap();
        }
        assert_eq!(cache.len(), 2, "cache must never exceed max_entries");
    }

    #[test]
    fn invalidate_removes_matching_prefix() {
        let cache = IntentCache::in_memory(IntentCacheConfig::default());
        cache.entries.insert("abc123".into(), CacheEntry::new("abc123", ir(), 60));
        cache.entries.insert("abcxyz".into(), CacheEntry::new("abcxyz", ir(), 60));
        cache.entries.insert("zzz".into(), CacheEntry::new("zzz", ir(), 60));
        cache.invalidate("abc");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_key_is_deterministic_and_case_insensitive() {
        let a = cache_key("Do The Thing", "ctx");
        let b = cache_key("  do the thing  ", "ctx");
        assert_eq!(a, b);
    }
}
