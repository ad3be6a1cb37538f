use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
	pub service: Service,
	pub backend: Backend,
	pub embedding: Embedding,
	pub search: Search,
	pub escalation: Escalation,
	pub fusion: Fusion,
	pub processing: Processing,
	pub cache: Cache,
	pub monitor: Monitor,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Service {
	pub log_level: String,
}
impl Default for Service {
	fn default() -> Self {
		Self { log_level: "info".to_string() }
	}
}

/// Elasticsearch-compatible index serving both text and kNN queries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Backend {
	pub url: String,
	pub ac_index: String,
	pub vector_index: String,
	pub vector_field: String,
	/// Fields searched by the fuzzy multi-match clause, with optional `^boost` suffixes.
	pub text_fields: Vec<String>,
	pub phrase_field: String,
	pub phrase_boost: f32,
	pub vector_dim: u32,
	/// Upper bound for kNN `k`, regardless of the requested top-k.
	pub max_k: u32,
	pub timeout_ms: u64,
	pub max_retries: u32,
	pub base_backoff_ms: u64,
	pub health_check_interval_secs: u64,
	pub latency_window: usize,
	pub api_key: Option<String>,
	pub default_headers: Map<String, Value>,
}
impl Default for Backend {
	fn default() -> Self {
		Self {
			url: "http://localhost:9200".to_string(),
			ac_index: "watchlist_ac".to_string(),
			vector_index: "watchlist_vectors".to_string(),
			vector_field: "name_vector".to_string(),
			text_fields: vec![
				"name^3".to_string(),
				"aliases^2".to_string(),
				"name_text".to_string(),
			],
			phrase_field: "name".to_string(),
			phrase_boost: 2.0,
			vector_dim: 384,
			max_k: 100,
			timeout_ms: 5_000,
			max_retries: 3,
			base_backoff_ms: 100,
			health_check_interval_secs: 300,
			latency_window: 1_000,
			api_key: None,
			default_headers: Map::new(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Embedding {
	pub enabled: bool,
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}
impl Default for Embedding {
	fn default() -> Self {
		Self {
			enabled: false,
			provider_id: "openai".to_string(),
			api_base: "http://localhost:8000".to_string(),
			api_key: String::new(),
			path: "/v1/embeddings".to_string(),
			model: "multilingual-e5-small".to_string(),
			dimensions: 384,
			timeout_ms: 2_000,
			default_headers: Map::new(),
		}
	}
}

/// Defaults for per-request search options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Search {
	pub top_k: u32,
	pub timeout_ms: u64,
	pub ac_boost: f32,
	pub ac_fuzziness: u8,
	pub ac_min_score: f32,
	pub vector_boost: f32,
	pub vector_min_score: f32,
	pub vector_ef_search: u32,
	pub max_escalation_results: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			top_k: 50,
			timeout_ms: 5_000,
			ac_boost: 1.0,
			ac_fuzziness: 1,
			ac_min_score: 0.0,
			vector_boost: 1.0,
			vector_min_score: 0.0,
			vector_ef_search: 100,
			max_escalation_results: 200,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Escalation {
	pub min_ac_results: u32,
	pub min_ac_score: f32,
	pub max_score_variance: f32,
	/// Relative margin by which the best vector score must beat the best AC score.
	pub vector_preference_margin: f32,
	pub vector_fallback_min_cosine: f32,
}
impl Default for Escalation {
	fn default() -> Self {
		Self {
			min_ac_results: 2,
			min_ac_score: 0.7,
			max_score_variance: 0.3,
			vector_preference_margin: 0.2,
			vector_fallback_min_cosine: 0.5,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Fusion {
	/// Either "weighted" (raw merge weights) or "formula" (product-level weights).
	pub strategy: String,
	pub ac_weight: f32,
	pub vector_weight: f32,
	pub formula_ac_weight: f32,
	pub formula_vector_weight: f32,
	pub anchor_bonus: f32,
	pub context_penalty: f32,
	pub anchor_boost_factor: f32,
	pub fuzzy_weight: f32,
}
impl Default for Fusion {
	fn default() -> Self {
		Self {
			strategy: "weighted".to_string(),
			ac_weight: 0.7,
			vector_weight: 0.3,
			formula_ac_weight: 0.55,
			formula_vector_weight: 0.45,
			anchor_bonus: 0.05,
			context_penalty: 0.1,
			anchor_boost_factor: 1.2,
			fuzzy_weight: 0.3,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Processing {
	pub deduplicate: bool,
	pub fuzzy_rerank: bool,
	pub anchor_boost: bool,
	pub metadata_filter: bool,
	pub validate: bool,
}
impl Default for Processing {
	fn default() -> Self {
		Self {
			deduplicate: true,
			fuzzy_rerank: true,
			anchor_boost: true,
			metadata_filter: true,
			validate: true,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub enabled: bool,
	pub embedding_ttl_secs: u64,
	pub result_ttl_secs: u64,
	pub query_ttl_secs: u64,
	pub embedding_capacity: usize,
	pub result_capacity: usize,
	pub query_capacity: usize,
}
impl Default for Cache {
	fn default() -> Self {
		Self {
			enabled: true,
			embedding_ttl_secs: 3_600,
			result_ttl_secs: 300,
			query_ttl_secs: 600,
			embedding_capacity: 10_000,
			result_capacity: 2_000,
			query_capacity: 2_000,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Monitor {
	pub history_limit: usize,
	pub rate_limit_per_minute: u32,
}
impl Default for Monitor {
	fn default() -> Self {
		Self { history_limit: 10_000, rate_limit_per_minute: 600 }
	}
}
