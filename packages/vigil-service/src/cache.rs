//! In-process TTL caches for embeddings, processed results and executor decisions.

use std::{
	num::NonZeroUsize,
	sync::{
		Mutex,
		atomic::{AtomicU64, Ordering},
	},
};

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::{Error, Result};
use vigil_domain::{Candidate, QueryMode, SearchOptions, text};

const RESULT_CACHE_SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
	Embedding,
	Result,
	Query,
}
impl CacheKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Embedding => "embedding",
			Self::Result => "result",
			Self::Query => "query",
		}
	}
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
	pub value: V,
	pub inserted_at: OffsetDateTime,
}
impl<V> CacheEntry<V> {
	pub fn is_fresh(&self, now: OffsetDateTime, ttl: Duration) -> bool {
		now - self.inserted_at < ttl
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheKindStats {
	pub size: usize,
	pub capacity: usize,
	pub hits: u64,
	pub misses: u64,
	pub hit_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
	pub embedding: CacheKindStats,
	pub result: CacheKindStats,
	pub query: CacheKindStats,
}

/// Executor decision recorded per query and mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetadata {
	pub mode: QueryMode,
	pub tier: u8,
	pub reason: String,
	pub escalated: bool,
	pub ac_count: usize,
	pub vector_count: usize,
}

/// LRU-bounded cache whose entries also expire after a fixed TTL. Expired entries are evicted
/// lazily on read and by [`TtlCache::purge_expired_at`].
#[derive(Debug)]
pub struct TtlCache<V> {
	kind: CacheKind,
	ttl: Duration,
	capacity: usize,
	entries: Mutex<LruCache<String, CacheEntry<V>>>,
	hits: AtomicU64,
	misses: AtomicU64,
}
impl<V> TtlCache<V>
where
	V: Clone,
{
	pub fn new(kind: CacheKind, capacity: usize, ttl: Duration) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

		Self {
			kind,
			ttl,
			capacity: capacity.get(),
			entries: Mutex::new(LruCache::new(capacity)),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	pub fn kind(&self) -> CacheKind {
		self.kind
	}

	pub fn get(&self, key: &str) -> Option<V> {
		self.get_at(key, OffsetDateTime::now_utc())
	}

	pub fn get_at(&self, key: &str, now: OffsetDateTime) -> Option<V> {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		if let Some(entry) = entries.get(key) {
			if entry.is_fresh(now, self.ttl) {
				let value = entry.value.clone();

				self.hits.fetch_add(1, Ordering::Relaxed);

				return Some(value);
			}

			entries.pop(key);
		}

		self.misses.fetch_add(1, Ordering::Relaxed);

		None
	}

	pub fn insert(&self, key: impl Into<String>, value: V) {
		self.insert_at(key, value, OffsetDateTime::now_utc());
	}

	pub fn insert_at(&self, key: impl Into<String>, value: V, now: OffsetDateTime) {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		entries.put(key.into(), CacheEntry { value, inserted_at: now });
	}

	/// Removes every expired entry and returns how many were dropped.
	pub fn purge_expired_at(&self, now: OffsetDateTime) -> usize {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
		let expired: Vec<String> = entries
			.iter()
			.filter(|(_, entry)| !entry.is_fresh(now, self.ttl))
			.map(|(key, _)| key.clone())
			.collect();

		for key in &expired {
			entries.pop(key);
		}

		expired.len()
	}

	pub fn clear(&self) {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).clear();
	}

	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn stats(&self) -> CacheKindStats {
		let hits = self.hits.load(Ordering::Relaxed);
		let misses = self.misses.load(Ordering::Relaxed);
		let total = hits + misses;

		CacheKindStats {
			size: self.len(),
			capacity: self.capacity,
			hits,
			misses,
			hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
		}
	}
}

/// The three caches the service reads through. Each has its own lock.
#[derive(Debug)]
pub struct CacheManager {
	enabled: bool,
	pub embeddings: TtlCache<Vec<f32>>,
	pub results: TtlCache<Vec<Candidate>>,
	pub queries: TtlCache<QueryMetadata>,
}
impl CacheManager {
	pub fn new(cfg: &vigil_config::Cache) -> Self {
		Self {
			enabled: cfg.enabled,
			embeddings: TtlCache::new(
				CacheKind::Embedding,
				cfg.embedding_capacity,
				seconds(cfg.embedding_ttl_secs),
			),
			results: TtlCache::new(
				CacheKind::Result,
				cfg.result_capacity,
				seconds(cfg.result_ttl_secs),
			),
			queries: TtlCache::new(
				CacheKind::Query,
				cfg.query_capacity,
				seconds(cfg.query_ttl_secs),
			),
		}
	}

	pub fn enabled(&self) -> bool {
		self.enabled
	}

	/// Sweeps all three caches and returns the total number of removed entries.
	pub fn purge_expired(&self) -> usize {
		self.purge_expired_at(OffsetDateTime::now_utc())
	}

	pub fn purge_expired_at(&self, now: OffsetDateTime) -> usize {
		let removed = self.embeddings.purge_expired_at(now)
			+ self.results.purge_expired_at(now)
			+ self.queries.purge_expired_at(now);

		if removed > 0 {
			tracing::info!(removed, "Expired cache entries purged.");
		}

		removed
	}

	pub fn clear(&self, kind: CacheKind) {
		match kind {
			CacheKind::Embedding => self.embeddings.clear(),
			CacheKind::Result => self.results.clear(),
			CacheKind::Query => self.queries.clear(),
		}
	}

	pub fn clear_all(&self) {
		self.embeddings.clear();
		self.results.clear();
		self.queries.clear();
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			embedding: self.embeddings.stats(),
			result: self.results.stats(),
			query: self.queries.stats(),
		}
	}
}

pub fn hash_cache_key(payload: &Value) -> Result<String> {
	let raw = serde_json::to_vec(payload).map_err(|err| Error::Cache {
		message: format!("Failed to encode cache key payload: {err}"),
	})?;

	Ok(blake3::hash(&raw).to_hex().to_string())
}

pub fn cache_key_prefix(key: &str) -> &str {
	let len = key.len().min(12);

	&key[..len]
}

/// Embedding keys are the normalized query text itself.
pub fn build_embedding_cache_key(query: &str) -> String {
	text::normalize_text(query)
}

pub fn build_result_cache_key(
	query: &str,
	original_text: &str,
	options: &SearchOptions,
) -> Result<String> {
	let options = serde_json::to_value(options).map_err(|err| Error::Cache {
		message: format!("Failed to encode search options: {err}"),
	})?;
	let payload = serde_json::json!({
		"kind": CacheKind::Result.as_str(),
		"schema_version": RESULT_CACHE_SCHEMA_VERSION,
		"query": query.trim(),
		"original_text": original_text.trim(),
		"options": options,
	});

	hash_cache_key(&payload)
}

pub fn build_query_cache_key(query: &str, mode: QueryMode) -> String {
	format!("{}:{}", mode.as_str(), text::normalize_text(query))
}

fn seconds(secs: u64) -> Duration {
	Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn at(secs: i64) -> OffsetDateTime {
		OffsetDateTime::UNIX_EPOCH + Duration::seconds(secs)
	}

	#[test]
	fn entries_expire_after_ttl() {
		let cache = TtlCache::new(CacheKind::Embedding, 4, Duration::seconds(10));

		cache.insert_at("ivan petrov", vec![0.1_f32], at(0));

		assert_eq!(cache.get_at("ivan petrov", at(9)), Some(vec![0.1]));
		assert_eq!(cache.get_at("ivan petrov", at(10)), None);
		assert!(cache.is_empty());

		let stats = cache.stats();

		assert_eq!((stats.hits, stats.misses), (1, 1));
	}

	#[test]
	fn lru_capacity_evicts_least_recent() {
		let cache = TtlCache::new(CacheKind::Query, 2, Duration::seconds(60));

		cache.insert_at("a", 1, at(0));
		cache.insert_at("b", 2, at(0));

		assert_eq!(cache.get_at("a", at(1)), Some(1));

		cache.insert_at("c", 3, at(1));

		assert_eq!(cache.get_at("b", at(1)), None);
		assert_eq!(cache.get_at("a", at(1)), Some(1));
	}

	#[test]
	fn purge_reports_removed_count() {
		let cache = TtlCache::new(CacheKind::Result, 8, Duration::seconds(5));

		cache.insert_at("old", 1, at(0));
		cache.insert_at("new", 2, at(4));

		assert_eq!(cache.purge_expired_at(at(6)), 1);
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn result_keys_are_deterministic_and_option_sensitive() {
		let options = SearchOptions::default();
		let first = build_result_cache_key("ivan petrov", "Ivan Petrov", &options)
			.expect("Failed to build key.");
		let second = build_result_cache_key(" ivan petrov ", "Ivan Petrov", &options)
			.expect("Failed to build key.");
		let other = build_result_cache_key("ivan petrov", "Ivan Petrov", &options.with_top_k(5))
			.expect("Failed to build key.");

		assert_eq!(first, second);
		assert_ne!(first, other);
		assert_eq!(cache_key_prefix(&first).len(), 12);
	}

	#[test]
	fn query_keys_include_mode() {
		assert_eq!(build_query_cache_key("Ivan  Petrov", QueryMode::Auto), "auto:ivan petrov");
		assert_ne!(
			build_query_cache_key("Ivan Petrov", QueryMode::Auto),
			build_query_cache_key("Ivan Petrov", QueryMode::Hybrid)
		);
	}
}
