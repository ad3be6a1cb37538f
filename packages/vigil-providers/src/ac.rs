//! Fuzzy multi-field text search with an exact-phrase clause.

use std::time::Duration;

use serde_json::{Value, json};

use crate::{
	BackendHealth, BackendQuery, BoxFuture, EsClient, LatencyStats, Result, SearchBackend, hits,
};
use vigil_domain::{Candidate, SearchMode, SearchOptions};

pub const FUZZY_CLAUSE: &str = "fuzzy";
pub const PHRASE_CLAUSE: &str = "phrase";

#[derive(Debug)]
pub struct AcBackend {
	client: EsClient,
	index: String,
	text_fields: Vec<String>,
	phrase_field: String,
	phrase_boost: f32,
	skip_fields: Vec<String>,
}
impl AcBackend {
	pub fn new(cfg: &vigil_config::Backend) -> Result<Self> {
		Ok(Self {
			client: EsClient::new("ac", cfg)?,
			index: cfg.ac_index.clone(),
			text_fields: cfg.text_fields.clone(),
			phrase_field: cfg.phrase_field.clone(),
			phrase_boost: cfg.phrase_boost,
			skip_fields: vec![cfg.vector_field.clone()],
		})
	}

	pub fn build_body(&self, text: &str, options: &SearchOptions) -> Value {
		let mut bool_query = json!({
			"should": [
				{
					"multi_match": {
						"query": text,
						"fields": self.text_fields,
						"fuzziness": options.ac.fuzziness,
						"boost": options.ac.boost,
						"_name": FUZZY_CLAUSE,
					}
				},
				{
					"match_phrase": {
						(self.phrase_field.as_str()): {
							"query": text,
							"boost": self.phrase_boost,
							"_name": PHRASE_CLAUSE,
						}
					}
				}
			],
			"minimum_should_match": 1,
		});

		if !options.entity_types.is_empty() {
			let types: Vec<&str> = options.entity_types.iter().map(|kind| kind.as_str()).collect();

			bool_query["filter"] = json!([{ "terms": { "entity_type": types } }]);
		}

		let mut body = json!({
			"size": options.top_k,
			"query": { "bool": bool_query },
		});

		if options.ac.min_score > 0.0 {
			body["min_score"] = json!(options.ac.min_score);
		}

		body
	}

	pub fn parse_response(&self, json: &Value) -> Result<Vec<Candidate>> {
		let skip: Vec<&str> = self.skip_fields.iter().map(String::as_str).collect();
		let mut out = Vec::new();

		for hit in hits::parse_hits(json)? {
			let Some(mut candidate) = hits::candidate_from_hit(&hit, &self.phrase_field, &skip)
			else {
				continue;
			};

			candidate.match_fields = self.match_fields(&hit.matched_queries);
			candidate.search_mode = if hit.matched_queries.iter().all(|name| name == FUZZY_CLAUSE)
				&& !hit.matched_queries.is_empty()
			{
				SearchMode::Fuzzy
			} else {
				SearchMode::Ac
			};
			candidate.trace.ac_score = Some(hit.score);

			out.push(candidate);
		}

		Ok(out)
	}

	/// Maps named clauses to field names: the phrase field first, then the fuzzy fields without
	/// their boosts.
	fn match_fields(&self, matched_queries: &[String]) -> Vec<String> {
		let mut fields = Vec::new();

		if matched_queries.iter().any(|name| name == PHRASE_CLAUSE) {
			fields.push(self.phrase_field.clone());
		}
		if matched_queries.iter().any(|name| name == FUZZY_CLAUSE) {
			for field in &self.text_fields {
				let bare = field.split('^').next().unwrap_or(field).to_string();

				if !fields.contains(&bare) {
					fields.push(bare);
				}
			}
		}

		fields
	}

	async fn search_text(&self, text: &str, options: &SearchOptions) -> Result<Vec<Candidate>> {
		let body = self.build_body(text, options);
		let timeout = Duration::from_millis(options.timeout_ms);
		let Some(json) = self.client.search(&self.index, &body, timeout).await else {
			return Ok(Vec::new());
		};

		self.parse_response(&json)
	}
}
impl SearchBackend for AcBackend {
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
				BackendQuery::Text(text) => self.search_text(text, options).await,
				other => Err(crate::Error::UnsupportedQuery {
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
