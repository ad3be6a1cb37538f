//! Runs the AC and Vector branches, decides on escalation and fuses raw results.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use crate::cache::{self, CacheKind, CacheManager, QueryMetadata};
use vigil_domain::{
	Candidate, MatchSource, QueryMode, SearchMode, SearchOptions, cmp_score_desc, text,
};
use vigil_providers::{
	BackendQuery, EmbeddingProvider, SearchBackend,
	latency::{best_score, score_variance},
};

pub const REASON_AC_SUFFICIENT: &str = "ac-sufficient";
pub const REASON_ESCALATION_DISABLED: &str = "escalation_disabled";
pub const REASON_HYBRID_FUSION: &str = "hybrid_fusion";
pub const REASON_VECTOR_FALLBACK: &str = "vector_fallback";
pub const REASON_VECTOR_FAILED: &str = "vector_failed";
pub const REASON_AC_FAILED: &str = "ac_failed";
pub const REASON_AC_ONLY: &str = "ac_only";
pub const REASON_VECTOR_ONLY: &str = "vector_only";

const TIER_AC: u8 = 0;
const TIER_FUSED: u8 = 1;
const TIER_VECTOR: u8 = 2;

#[derive(Clone)]
pub struct Backends {
	pub ac: Arc<dyn SearchBackend>,
	pub vector: Arc<dyn SearchBackend>,
}

/// Outcome of one search branch. Failures carry a reason and never abort the request.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchOutcome {
	Success(Vec<Candidate>),
	Failure { reason: String },
}
impl BranchOutcome {
	pub fn is_failure(&self) -> bool {
		matches!(self, Self::Failure { .. })
	}

	pub fn candidates(&self) -> &[Candidate] {
		match self {
			Self::Success(candidates) => candidates,
			Self::Failure { .. } => &[],
		}
	}

	pub fn into_candidates(self) -> Vec<Candidate> {
		match self {
			Self::Success(candidates) => candidates,
			Self::Failure { .. } => Vec::new(),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
	pub candidates: Vec<Candidate>,
	pub metadata: QueryMetadata,
	/// Reasons of failed branches, in execution order.
	pub failures: Vec<String>,
	/// Number of branches that ran.
	pub branches: usize,
}
impl Execution {
	/// Every branch that ran failed.
	pub fn total_failure(&self) -> bool {
		self.branches > 0 && self.failures.len() == self.branches
	}

	pub fn degraded(&self) -> bool {
		!self.failures.is_empty()
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
	pub ac: f32,
	pub vector: f32,
}
impl FusionWeights {
	/// `formula` selects the product-level weights; anything else the raw merge weights.
	pub fn from_config(cfg: &vigil_config::Fusion) -> Self {
		if cfg.strategy == "formula" {
			Self { ac: cfg.formula_ac_weight, vector: cfg.formula_vector_weight }
		} else {
			Self { ac: cfg.ac_weight, vector: cfg.vector_weight }
		}
	}
}

pub struct SearchExecutor {
	backends: Backends,
	embedder: Option<Arc<dyn EmbeddingProvider>>,
	caches: Arc<CacheManager>,
	escalation: vigil_config::Escalation,
	weights: FusionWeights,
	dimensions: usize,
}
impl SearchExecutor {
	pub fn new(
		backends: Backends,
		embedder: Option<Arc<dyn EmbeddingProvider>>,
		caches: Arc<CacheManager>,
		cfg: &vigil_config::Config,
	) -> Self {
		Self {
			backends,
			embedder,
			caches,
			escalation: cfg.escalation.clone(),
			weights: FusionWeights::from_config(&cfg.fusion),
			dimensions: cfg.backend.vector_dim as usize,
		}
	}

	pub fn backends(&self) -> &Backends {
		&self.backends
	}

	pub async fn execute(&self, query: &str, options: &SearchOptions) -> Execution {
		match options.search_mode {
			QueryMode::Auto => self.execute_auto(query, options).await,
			QueryMode::Ac => {
				let ac = self.run_ac(query, options).await;

				single_branch(options.search_mode, ac, TIER_AC, REASON_AC_ONLY)
			},
			QueryMode::Vector => {
				let vector = self.run_vector(query, options).await;

				single_branch(options.search_mode, vector, TIER_VECTOR, REASON_VECTOR_ONLY)
			},
			QueryMode::Hybrid => self.execute_hybrid(query, options).await,
		}
	}

	async fn execute_auto(&self, query: &str, options: &SearchOptions) -> Execution {
		if !options.escalation.enabled {
			let ac = self.run_ac(query, options).await;
			let failures = failure_reasons([&ac]);
			let ac = ac.into_candidates();
			let metadata =
				query_metadata(options, TIER_AC, REASON_ESCALATION_DISABLED, false, &ac, &[]);

			return Execution {
				candidates: tag(ac, TIER_AC, REASON_ESCALATION_DISABLED),
				metadata,
				failures,
				branches: 1,
			};
		}

		// The query embedding overlaps the AC search.
		let (ac, embedding) =
			tokio::join!(self.run_ac(query, options), self.embed_query(query, options));
		let mut failures = failure_reasons([&ac]);
		let ac = ac.into_candidates();

		if !should_escalate_to_vector(&ac, options, &self.escalation) {
			let metadata = query_metadata(options, TIER_AC, REASON_AC_SUFFICIENT, false, &ac, &[]);

			return Execution {
				candidates: tag(ac, TIER_AC, REASON_AC_SUFFICIENT),
				metadata,
				failures,
				branches: 1,
			};
		}

		tracing::info!(
			ac_count = ac.len(),
			best_ac_score = best_score(ac.iter().map(|c| c.score)),
			"Escalating to vector search."
		);

		let vector = match embedding {
			Some(vector) => self.search_vector(&vector, options).await,
			None => embedding_timed_out(),
		};

		failures.extend(failure_reasons([&vector]));

		if vector.is_failure() {
			let metadata = query_metadata(options, TIER_AC, REASON_VECTOR_FAILED, true, &ac, &[]);
			let candidates = tag(ac, TIER_AC, REASON_VECTOR_FAILED)
				.into_iter()
				.map(|candidate| candidate.with_mode(SearchMode::FallbackAc))
				.collect();

			return Execution { candidates, metadata, failures, branches: 2 };
		}

		let vector = vector.into_candidates();

		if should_prefer_vector_over_ac(&ac, &vector, self.escalation.vector_preference_margin) {
			let floor = self.escalation.vector_fallback_min_cosine;
			let kept: Vec<Candidate> = vector
				.iter()
				.filter(|candidate| candidate.trace.cosine.unwrap_or(candidate.score) >= floor)
				.cloned()
				.collect();

			if kept.len() < vector.len() {
				tracing::info!(
					dropped = vector.len() - kept.len(),
					floor,
					"Vector fallback candidates below cosine floor dropped."
				);
			}

			let metadata =
				query_metadata(options, TIER_VECTOR, REASON_VECTOR_FALLBACK, true, &ac, &vector);
			let mut candidates = tag(kept, TIER_VECTOR, REASON_VECTOR_FALLBACK);

			candidates.truncate(options.top_k as usize);

			return Execution { candidates, metadata, failures, branches: 2 };
		}

		let metadata =
			query_metadata(options, TIER_FUSED, REASON_HYBRID_FUSION, true, &ac, &vector);
		let fused = fuse_hybrid_results(&ac, &vector, options.top_k as usize, self.weights);

		Execution {
			candidates: tag(fused, TIER_FUSED, REASON_HYBRID_FUSION),
			metadata,
			failures,
			branches: 2,
		}
	}

	async fn execute_hybrid(&self, query: &str, options: &SearchOptions) -> Execution {
		let (ac, vector) =
			tokio::join!(self.run_ac(query, options), self.run_vector(query, options));
		let failures = failure_reasons([&ac, &vector]);
		let metadata = query_metadata(
			options,
			TIER_FUSED,
			REASON_HYBRID_FUSION,
			false,
			ac.candidates(),
			vector.candidates(),
		);
		let top_k = options.top_k as usize;
		let candidates = match (ac.is_failure(), vector.is_failure()) {
			(false, true) => tag(ac.into_candidates(), TIER_AC, REASON_VECTOR_FAILED)
				.into_iter()
				.map(|candidate| candidate.with_mode(SearchMode::FallbackAc))
				.take(top_k)
				.collect(),
			(true, false) => tag(vector.into_candidates(), TIER_VECTOR, REASON_AC_FAILED)
				.into_iter()
				.map(|candidate| candidate.with_mode(SearchMode::FallbackVector))
				.take(top_k)
				.collect(),
			_ => {
				let fused = fuse_hybrid_results(
					ac.candidates(),
					vector.candidates(),
					top_k,
					self.weights,
				);

				tag(fused, TIER_FUSED, REASON_HYBRID_FUSION)
			},
		};

		Execution { candidates, metadata, failures, branches: 2 }
	}

	async fn run_ac(&self, query: &str, options: &SearchOptions) -> BranchOutcome {
		let backend = self.backends.ac.as_ref();

		run_branch(backend, options, backend.search(BackendQuery::Text(query), options)).await
	}

	async fn run_vector(&self, query: &str, options: &SearchOptions) -> BranchOutcome {
		match self.embed_query(query, options).await {
			Some(vector) => self.search_vector(&vector, options).await,
			None => embedding_timed_out(),
		}
	}

	/// [`Self::query_vector`] under the request deadline; `None` when it ran out.
	async fn embed_query(&self, query: &str, options: &SearchOptions) -> Option<Vec<f32>> {
		let deadline = Duration::from_millis(options.timeout_ms);

		match tokio::time::timeout(deadline, self.query_vector(query)).await {
			Ok(vector) => Some(vector),
			Err(_) => {
				tracing::warn!(
					backend = self.backends.vector.name(),
					timeout_ms = options.timeout_ms,
					"Query embedding timed out."
				);

				None
			},
		}
	}

	async fn search_vector(&self, vector: &[f32], options: &SearchOptions) -> BranchOutcome {
		let backend = self.backends.vector.as_ref();

		run_branch(backend, options, backend.search(BackendQuery::Vector(vector), options)).await
	}

	/// Cached embedding of `query`, or a deterministic fallback vector when the provider is
	/// missing, fails or returns the wrong dimensionality.
	pub async fn query_vector(&self, query: &str) -> Vec<f32> {
		let key = cache::build_embedding_cache_key(query);

		if self.caches.enabled() {
			if let Some(vector) = self.caches.embeddings.get(&key) {
				tracing::info!(
					cache_kind = CacheKind::Embedding.as_str(),
					hit = true,
					"Cache hit."
				);

				return vector;
			}

			tracing::info!(cache_kind = CacheKind::Embedding.as_str(), hit = false, "Cache miss.");
		}

		let Some(embedder) = self.embedder.as_ref() else {
			return vigil_providers::fallback_vector(&key, self.dimensions);
		};
		let texts = [query.to_string()];
		let vector = match embedder.embed(&texts).await {
			Ok(mut vectors) if vectors.len() == 1 && vectors[0].len() == self.dimensions =>
				vectors.swap_remove(0),
			Ok(vectors) => {
				tracing::warn!(
					expected = self.dimensions,
					actual = vectors.first().map(Vec::len).unwrap_or(0),
					"Embedding dimension mismatch; using fallback vector."
				);

				return vigil_providers::fallback_vector(&key, self.dimensions);
			},
			Err(err) => {
				tracing::warn!(error = %err, "Embedding failed; using fallback vector.");

				return vigil_providers::fallback_vector(&key, self.dimensions);
			},
		};

		if self.caches.enabled() {
			self.caches.embeddings.insert(key, vector.clone());
		}

		vector
	}
}

/// True when AC alone is too weak: no or too few hits, a best score under the threshold, or
/// scores spread wider than the variance ceiling.
pub fn should_escalate_to_vector(
	ac: &[Candidate],
	options: &SearchOptions,
	cfg: &vigil_config::Escalation,
) -> bool {
	if ac.is_empty() || ac.len() < cfg.min_ac_results as usize {
		return true;
	}

	let scores: Vec<f32> = ac.iter().map(|candidate| candidate.score).collect();
	let best = best_score(scores.iter().copied()).unwrap_or(0.0);

	if best < options.escalation.threshold {
		return true;
	}

	scores.len() > 1 && score_variance(&scores) > cfg.max_score_variance
}

/// True when only Vector found anything, or its best score beats AC's by more than `margin`.
pub fn should_prefer_vector_over_ac(ac: &[Candidate], vector: &[Candidate], margin: f32) -> bool {
	let Some(best_vector) = best_score(vector.iter().map(|candidate| candidate.score)) else {
		return false;
	};
	let Some(best_ac) = best_score(ac.iter().map(|candidate| candidate.score)) else {
		return true;
	};

	best_vector > best_ac * (1.0 + margin)
}

/// Weighted merge keyed by normalized text plus entity id. Every hit adds its weighted score to
/// its entry, so repeated evidence on one side accumulates; entries seen by both sides become
/// `hybrid`.
pub fn fuse_hybrid_results(
	ac: &[Candidate],
	vector: &[Candidate],
	top_k: usize,
	weights: FusionWeights,
) -> Vec<Candidate> {
	let mut index: HashMap<String, usize> = HashMap::new();
	let mut entries: Vec<FusedEntry> = Vec::new();

	for (source, candidates) in [(MatchSource::Ac, ac), (MatchSource::Vector, vector)] {
		for candidate in candidates {
			let key = fusion_key(candidate);
			let slot = *index.entry(key).or_insert_with(|| {
				entries.push(FusedEntry::new(candidate.clone(), source));

				entries.len() - 1
			});

			entries[slot].absorb(candidate, source);
		}
	}

	let mut fused: Vec<Candidate> =
		entries.into_iter().map(|entry| entry.finish(weights)).collect();

	fused.sort_by(|a, b| cmp_score_desc(a.score, b.score));
	fused.truncate(top_k);

	fused
}

fn fusion_key(candidate: &Candidate) -> String {
	let text = text::normalize_text(&candidate.text);

	match candidate.metadata.entity_id.as_deref() {
		Some(id) => format!("{text}|{id}"),
		None => text,
	}
}

struct FusedEntry {
	candidate: Candidate,
	source: MatchSource,
	ac_sum: Option<f32>,
	vector_sum: Option<f32>,
	best_vector: f32,
}
impl FusedEntry {
	fn new(candidate: Candidate, source: MatchSource) -> Self {
		Self { candidate, source, ac_sum: None, vector_sum: None, best_vector: f32::MIN }
	}

	fn absorb(&mut self, candidate: &Candidate, source: MatchSource) {
		if source != self.source {
			self.source = MatchSource::Hybrid;
		}

		match source {
			MatchSource::Vector => {
				self.vector_sum = Some(self.vector_sum.unwrap_or(0.0) + candidate.score);

				// The cosine of the strongest vector hit represents the entry.
				if candidate.score > self.best_vector {
					self.best_vector = candidate.score;
					self.candidate.trace.cosine = candidate.trace.cosine;
				}
			},
			_ => self.ac_sum = Some(self.ac_sum.unwrap_or(0.0) + candidate.score),
		}

		for field in &candidate.match_fields {
			if !self.candidate.match_fields.contains(field) {
				self.candidate.match_fields.push(field.clone());
			}
		}
	}

	fn finish(self, weights: FusionWeights) -> Candidate {
		let Self { mut candidate, source, ac_sum, vector_sum, .. } = self;
		let score =
			weights.ac * ac_sum.unwrap_or(0.0) + weights.vector * vector_sum.unwrap_or(0.0);

		candidate.score = score;
		candidate.confidence = score.clamp(0.0, 1.0);
		candidate.trace.source = Some(source);
		candidate.trace.ac_score = ac_sum;
		candidate.trace.vector_score = vector_sum;

		match source {
			MatchSource::Hybrid => candidate.search_mode = SearchMode::Hybrid,
			MatchSource::Vector => candidate.search_mode = SearchMode::Vector,
			MatchSource::Ac => {},
		}

		candidate
	}
}

async fn run_branch(
	backend: &dyn SearchBackend,
	options: &SearchOptions,
	search: impl Future<Output = vigil_providers::Result<Vec<Candidate>>>,
) -> BranchOutcome {
	let deadline = Duration::from_millis(options.timeout_ms);

	match tokio::time::timeout(deadline, search).await {
		Ok(Ok(candidates)) if candidates.is_empty() && !backend.is_connected() => {
			tracing::warn!(backend = backend.name(), "Backend disconnected; branch degraded.");

			BranchOutcome::Failure { reason: format!("{} backend disconnected", backend.name()) }
		},
		Ok(Ok(candidates)) => BranchOutcome::Success(candidates),
		Ok(Err(err)) => {
			tracing::warn!(backend = backend.name(), error = %err, "Search branch failed.");

			BranchOutcome::Failure { reason: format!("{}: {err}", backend.name()) }
		},
		Err(_) => {
			tracing::warn!(
				backend = backend.name(),
				timeout_ms = options.timeout_ms,
				"Search branch timed out."
			);

			BranchOutcome::Failure {
				reason: format!("{} timed out after {} ms", backend.name(), options.timeout_ms),
			}
		},
	}
}

fn embedding_timed_out() -> BranchOutcome {
	BranchOutcome::Failure { reason: "embedding timed out".to_string() }
}

fn single_branch(mode: QueryMode, outcome: BranchOutcome, tier: u8, reason: &str) -> Execution {
	let failures = failure_reasons([&outcome]);
	let candidates = outcome.into_candidates();
	let count = candidates.len();
	let (ac_count, vector_count) = if mode == QueryMode::Vector { (0, count) } else { (count, 0) };
	let metadata = QueryMetadata {
		mode,
		tier,
		reason: reason.to_string(),
		escalated: false,
		ac_count,
		vector_count,
	};

	Execution { candidates: tag(candidates, tier, reason), metadata, failures, branches: 1 }
}

fn failure_reasons<const N: usize>(outcomes: [&BranchOutcome; N]) -> Vec<String> {
	outcomes
		.into_iter()
		.filter_map(|outcome| match outcome {
			BranchOutcome::Failure { reason } => Some(reason.clone()),
			BranchOutcome::Success(_) => None,
		})
		.collect()
}

fn query_metadata(
	options: &SearchOptions,
	tier: u8,
	reason: &str,
	escalated: bool,
	ac: &[Candidate],
	vector: &[Candidate],
) -> QueryMetadata {
	QueryMetadata {
		mode: options.search_mode,
		tier,
		reason: reason.to_string(),
		escalated,
		ac_count: ac.len(),
		vector_count: vector.len(),
	}
}

fn tag(mut candidates: Vec<Candidate>, tier: u8, reason: &str) -> Vec<Candidate> {
	for candidate in &mut candidates {
		candidate.trace.tier = Some(tier);
		candidate.trace.reason = Some(reason.to_string());
	}

	candidates
}
