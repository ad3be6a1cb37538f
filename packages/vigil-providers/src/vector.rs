//! kNN search over name embeddings.

use std::time::Duration;

use serde_json::{Value, json};

use crate::{
	BackendHealth, BackendQuery, BoxFuture, Error, EsClient, LatencyStats, Result, SearchBackend,
	hits,
};
use vigil_domain::{Candidate, SearchMode, SearchOptions};

/// Upper bound Elasticsearch accepts for `num_candidates`.
const MAX_NUM_CANDIDATES: u32 = 10_000;

#[derive(Debug)]
pub struct VectorBackend {
	client: EsClient,
	index: String,
	vector_field: String,
	text_field: String,
	dimensions: usize,
	max_k: u32,
}
impl VectorBackend {
	pub fn new(cfg: &vigil_config::Backend) -> Result<Self> {
		Ok(Self {
			client: EsClient::new("vector", cfg)?,
			index: cfg.vector_index.clone(),
			vector_field: cfg.vector_field.clone(),
			text_field: cfg.phrase_field.clone(),
			dimensions: cfg.vector_dim as usize,
			max_k: cfg.max_k,
		})
	}

	pub fn dimensions(&self) -> usize {
		self.dimensions
	}

	/// `k` is capped by the configured `max_k`; the candidate pool is `escalation.max_results`,
	/// never smaller than `ef_search` or `k`.
	pub fn build_body(&self, vector: &[f32], options: &SearchOptions) -> Value {
		let k = options.top_k.min(self.max_k).max(1);
		let num_candidates = options
			.escalation
			.max_results
			.max(options.vector.ef_search)
			.max(k)
			.min(MAX_NUM_CANDIDATES);
		let mut knn = json!({
			"field": self.vector_field,
			"query_vector": vector,
			"k": k,
			"num_candidates": num_candidates,
			"boost": options.vector.boost,
		});

		if !options.entity_types.is_empty() {
			let types: Vec<&str> = options.entity_types.iter().map(|kind| kind.as_str()).collect();

			knn["filter"] = json!({ "terms": { "entity_type": types } });
		}

		let mut body = json!({
			"size": k,
			"knn": knn,
			"_source": { "excludes": [self.vector_field] },
		});

		if options.vector.min_score > 0.0 {
			body["min_score"] = json!(options.vector.min_score);
		}

		body
	}

	/// Hit scores use the Elasticsearch cosine scale `(1 + cos) / 2`, scaled by the boost; the raw
	/// cosine is recovered into the trace.
	pub fn parse_response(&self, json: &Value, boost: f32) -> Result<Vec<Candidate>> {
		let skip = [self.vector_field.as_str()];
		let boost = if boost > 0.0 { boost } else { 1.0 };
		let mut out = Vec::new();

		for hit in hits::parse_hits(json)? {
			let Some(mut candidate) = hits::candidate_from_hit(&hit, &self.text_field, &skip)
			else {
				continue;
			};
			let cosine = (2.0 * hit.score / boost - 1.0).clamp(-1.0, 1.0);

			candidate.search_mode = SearchMode::Vector;
			candidate.match_fields = vec![self.vector_field.clone()];
			candidate.trace.vector_score = Some(hit.score);
			candidate.trace.cosine = Some(cosine);

			out.push(candidate);
		}

		Ok(out)
	}

	async fn search_vector(
		&self,
		vector: &[f32],
		options: &SearchOptions,
	) -> Result<Vec<Candidate>> {
		if vector.len() != self.dimensions {
			return Err(Error::DimensionMismatch { expected: self.dimensions, actual: vector.len() });
		}

		let body = self.build_body(vector, options);
		let timeout = Duration::from_millis(options.timeout_ms);
		let Some(json) = self.client.search(&self.index, &body, timeout).await else {
			return Ok(Vec::new());
		};

		self.parse_response(&json, options.vector.boost)
	}
}
impl SearchBackend for VectorBackend {
	fn name(&self) -> &str {
		self.client.name()
	}

	fn search<'a>(
		&'a self,
		query: BackendQuery<'a>,
		options: &'a SearchOptions,
	) -> BoxFuture<'a, Result<Vec<Candidate>>> {
		Box::pin(async move {
			match query {
				BackendQuery::Vector(vector) => self.search_vector(vector, options).await,
				other => Err(Error::UnsupportedQuery {
					backend: self.client.name().to_string(),
					kind: other.kind(),
				}),
			}
		})
	}

	fn health_check(&self) -> BoxFuture<'_, BackendHealth> {
		Box::pin(self.client.health_check())
	}

	fn latency_stats(&self) -> LatencyStats {
		self.client.latency_stats()
	}

	fn is_connected(&self) -> bool {
		self.client.is_connected()
	}
}
