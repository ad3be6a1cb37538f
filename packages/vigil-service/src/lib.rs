pub mod cache;
pub mod executor;
pub mod monitor;
pub mod processor;
pub mod rate_limit;

mod error;

pub use cache::{CacheKind, CacheManager, CacheStats, QueryMetadata};
pub use error::{Error, Result};
pub use executor::{Backends, Execution, SearchExecutor};
pub use monitor::{Metrics, PerformanceMonitor, PerformanceStats, QueryPerformance};
pub use processor::ResultProcessor;
pub use rate_limit::RateLimiter;

use std::{sync::Arc, time::Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

use vigil_config::Config;
use vigil_domain::{Candidate, QueryMode, SearchOptions};
use vigil_providers::{
	AcBackend, BackendHealth, EmbeddingProvider, HealthStatus, HttpEmbedding, VectorBackend,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealth {
	pub status: HealthStatus,
	pub backends: Vec<BackendHealth>,
	pub cache: CacheStats,
}

struct SearchOutcome {
	candidates: Vec<Candidate>,
	cache_hit: bool,
	escalated: bool,
	error: Option<String>,
}
impl SearchOutcome {
	fn failed(message: String) -> Self {
		Self { candidates: Vec::new(), cache_hit: false, escalated: false, error: Some(message) }
	}
}

/// Entry point tying caches, execution, ranking and telemetry together.
pub struct HybridSearchService {
	pub cfg: Config,
	executor: SearchExecutor,
	processor: ResultProcessor,
	caches: Arc<CacheManager>,
	monitor: PerformanceMonitor,
	rate_limiter: RateLimiter,
}
impl HybridSearchService {
	pub fn new(
		cfg: Config,
		backends: Backends,
		embedder: Option<Arc<dyn EmbeddingProvider>>,
	) -> Self {
		let caches = Arc::new(CacheManager::new(&cfg.cache));
		let executor = SearchExecutor::new(backends, embedder, caches.clone(), &cfg);
		let processor = ResultProcessor::new(cfg.processing.clone(), cfg.fusion.clone());
		let monitor = PerformanceMonitor::new(cfg.monitor.history_limit);

		Self { cfg, executor, processor, caches, monitor, rate_limiter: RateLimiter::new() }
	}

	/// Builds the HTTP adapters and, when enabled, the embedding provider from configuration.
	pub fn from_config(cfg: Config) -> Result<Self> {
		let backends = Backends {
			ac: Arc::new(AcBackend::new(&cfg.backend)?),
			vector: Arc::new(VectorBackend::new(&cfg.backend)?),
		};
		let embedder: Option<Arc<dyn EmbeddingProvider>> = if cfg.embedding.enabled {
			Some(Arc::new(HttpEmbedding::new(&cfg.embedding)?))
		} else {
			None
		};

		Ok(Self::new(cfg, backends, embedder))
	}

	pub fn default_options(&self) -> SearchOptions {
		SearchOptions::from_config(&self.cfg.search, &self.cfg.escalation)
	}

	/// Never fails: invalid options, backend outages and timeouts all yield an empty list and an
	/// error entry in the monitor.
	pub async fn find_candidates(
		&self,
		query: &str,
		original_text: &str,
		options: &SearchOptions,
	) -> Vec<Candidate> {
		let span = tracing::info_span!(
			"find_candidates",
			request_id = %Uuid::new_v4(),
			mode = options.search_mode.as_str(),
		);

		self.find_candidates_inner(query, original_text, options).instrument(span).await
	}

	/// [`Self::find_candidates`] behind the per-client sliding-window limit.
	pub async fn find_candidates_for_client(
		&self,
		client_id: &str,
		query: &str,
		original_text: &str,
		options: &SearchOptions,
	) -> Result<Vec<Candidate>> {
		if !self.rate_limiter.check(client_id, self.cfg.monitor.rate_limit_per_minute) {
			tracing::warn!(client_id, "Rate limit exceeded.");

			return Err(Error::RateLimited { client_id: client_id.to_string() });
		}

		Ok(self.find_candidates(query, original_text, options).await)
	}

	pub async fn health_check(&self) -> ServiceHealth {
		let backends = self.executor.backends();
		let (ac, vector) = tokio::join!(backends.ac.health_check(), backends.vector.health_check());
		let connected = [&ac, &vector].iter().filter(|health| health.connected).count();
		let status = match connected {
			2 => HealthStatus::Healthy,
			1 => HealthStatus::Degraded,
			_ => HealthStatus::Unhealthy,
		};

		ServiceHealth { status, backends: vec![ac, vector], cache: self.caches.stats() }
	}

	pub fn get_metrics(&self) -> Metrics {
		self.monitor.get_metrics()
	}

	pub fn reset_metrics(&self) {
		self.monitor.reset();
		self.rate_limiter.reset();
	}

	pub fn performance_stats(&self, window_minutes: Option<u32>) -> PerformanceStats {
		self.monitor.performance_stats(window_minutes)
	}

	pub fn cache_stats(&self) -> CacheStats {
		self.caches.stats()
	}

	/// Purges expired cache entries and idle rate-limit windows. Returns the number of cache
	/// entries removed.
	pub fn purge_expired_cache(&self) -> usize {
		let idle_clients = self.rate_limiter.prune();
		let purged = self.caches.purge_expired();

		tracing::debug!(purged, idle_clients, "Expired state purged.");

		purged
	}

	/// Clients currently holding a rate-limit window.
	pub fn rate_limited_clients(&self) -> usize {
		self.rate_limiter.client_count()
	}

	/// Clears one cache, or all of them when `kind` is `None`.
	pub fn clear_cache(&self, kind: Option<CacheKind>) {
		match kind {
			Some(kind) => self.caches.clear(kind),
			None => self.caches.clear_all(),
		}
	}

	/// Executor decision recorded for the last uncached run of `query` in `mode`.
	pub fn query_metadata(&self, query: &str, mode: QueryMode) -> Option<QueryMetadata> {
		self.caches.queries.get(&cache::build_query_cache_key(query, mode))
	}

	async fn find_candidates_inner(
		&self,
		query: &str,
		original_text: &str,
		options: &SearchOptions,
	) -> Vec<Candidate> {
		let started = Instant::now();
		let outcome = self.search(query, original_text, options).await;
		let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;

		match outcome.error.as_deref() {
			Some(error) => tracing::warn!(error, duration_ms, "Search failed."),
			None => tracing::info!(
				results = outcome.candidates.len(),
				cache_hit = outcome.cache_hit,
				escalated = outcome.escalated,
				duration_ms,
				"Search completed."
			),
		}

		self.monitor.record_query_performance(QueryPerformance {
			query: query.to_string(),
			mode: options.search_mode,
			duration_ms,
			result_count: outcome.candidates.len(),
			cache_hit: outcome.cache_hit,
			escalated: outcome.escalated,
			error: outcome.error,
			at: OffsetDateTime::now_utc(),
		});

		outcome.candidates
	}

	async fn search(
		&self,
		query: &str,
		original_text: &str,
		options: &SearchOptions,
	) -> SearchOutcome {
		if query.trim().is_empty() {
			return SearchOutcome::failed(
				Error::InvalidRequest { message: "query must not be empty.".to_string() }
					.to_string(),
			);
		}
		if let Err(err) = options.validate() {
			return SearchOutcome::failed(Error::from(err).to_string());
		}

		let result_key = self.result_cache_key(query, original_text, options);

		if let Some(key) = result_key.as_deref() {
			if let Some(candidates) = self.caches.results.get(key) {
				tracing::info!(
					cache_kind = CacheKind::Result.as_str(),
					cache_key_prefix = cache::cache_key_prefix(key),
					hit = true,
					"Cache hit."
				);

				return SearchOutcome { candidates, cache_hit: true, escalated: false, error: None };
			}

			tracing::info!(
				cache_kind = CacheKind::Result.as_str(),
				cache_key_prefix = cache::cache_key_prefix(key),
				hit = false,
				"Cache miss."
			);
		}

		let execution = self.executor.execute(query, options).await;

		if execution.total_failure() {
			return SearchOutcome::failed(
				Error::Backend { message: execution.failures.join("; ") }.to_string(),
			);
		}

		let escalated = execution.metadata.escalated;
		let degraded = execution.degraded();
		let candidates =
			self.processor.process(execution.candidates, query, original_text, options);

		if self.caches.enabled() {
			let query_key = cache::build_query_cache_key(query, options.search_mode);

			self.caches.queries.insert(query_key, execution.metadata);

			// Degraded answers are never cached.
			match result_key {
				Some(key) if !degraded => {
					tracing::info!(
						cache_kind = CacheKind::Result.as_str(),
						cache_key_prefix = cache::cache_key_prefix(&key),
						results = candidates.len(),
						"Cache stored."
					);

					self.caches.results.insert(key, candidates.clone());
				},
				_ => {},
			}
		}

		SearchOutcome { candidates, cache_hit: false, escalated, error: None }
	}

	fn result_cache_key(
		&self,
		query: &str,
		original_text: &str,
		options: &SearchOptions,
	) -> Option<String> {
		if !self.caches.enabled() {
			return None;
		}

		match cache::build_result_cache_key(query, original_text, options) {
			Ok(key) => Some(key),
			Err(err) => {
				tracing::warn!(
					error = %err,
					cache_kind = CacheKind::Result.as_str(),
					"Cache key build failed."
				);

				None
			},
		}
	}
}
