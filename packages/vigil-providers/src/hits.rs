//! Parsing of `_search` responses into candidates.

use serde_json::{Map, Value};

use crate::{Error, Result};
use vigil_domain::{Candidate, CandidateMetadata, EntityType};

const FALLBACK_TEXT_FIELDS: [&str; 2] = ["name", "text"];

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
	pub id: String,
	pub score: f32,
	pub source: Map<String, Value>,
	pub matched_queries: Vec<String>,
}

pub fn parse_hits(json: &Value) -> Result<Vec<Hit>> {
	let hits = json
		.get("hits")
		.and_then(|hits| hits.get("hits"))
		.and_then(Value::as_array)
		.ok_or_else(|| Error::InvalidResponse {
			message: "Search response is missing hits.hits array.".to_string(),
		})?;
	let mut out = Vec::with_capacity(hits.len());

	for hit in hits {
		let id = hit.get("_id").and_then(Value::as_str).ok_or_else(|| Error::InvalidResponse {
			message: "Search hit is missing _id.".to_string(),
		})?;
		let score = hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
		let source = hit.get("_source").and_then(Value::as_object).cloned().unwrap_or_default();
		let matched_queries = hit
			.get("matched_queries")
			.and_then(Value::as_array)
			.map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
			.unwrap_or_default();

		out.push(Hit { id: id.to_string(), score, source, matched_queries });
	}

	Ok(out)
}

/// Builds a candidate from a hit. Returns `None` when the document carries no display text.
pub fn candidate_from_hit(hit: &Hit, text_field: &str, skip_fields: &[&str]) -> Option<Candidate> {
	let text = std::iter::once(text_field)
		.chain(FALLBACK_TEXT_FIELDS)
		.find_map(|field| hit.source.get(field).and_then(Value::as_str))?;
	let entity_type = hit
		.source
		.get("entity_type")
		.and_then(Value::as_str)
		.and_then(EntityType::parse)
		.unwrap_or_default();
	let metadata = metadata_from_source(&hit.source, text_field, skip_fields);

	Some(
		Candidate::new(hit.id.clone(), text, hit.score)
			.with_entity_type(entity_type)
			.with_metadata(metadata),
	)
}

fn metadata_from_source(
	source: &Map<String, Value>,
	text_field: &str,
	skip_fields: &[&str],
) -> CandidateMetadata {
	let mut metadata = CandidateMetadata::default();

	for (key, value) in source {
		if key == text_field || key == "entity_type" || skip_fields.contains(&key.as_str()) {
			continue;
		}

		match key.as_str() {
			"entity_id" | "id" => metadata.entity_id = scalar_string(value),
			"country" => metadata.country = scalar_string(value),
			"dob" | "birth_date" => metadata.dob = scalar_string(value),
			"source" => metadata.source = scalar_string(value),
			"aliases" => metadata.aliases = string_list(value),
			"document_ids" | "documents" => metadata.document_ids = string_list(value),
			"needs_context" => metadata.needs_context = value.as_bool().unwrap_or(false),
			_ => {
				metadata.extra.insert(key.clone(), value.clone());
			},
		}
	}

	metadata
}

fn scalar_string(value: &Value) -> Option<String> {
	match value {
		Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
		Value::Number(number) => Some(number.to_string()),
		_ => None,
	}
}

fn string_list(value: &Value) -> Vec<String> {
	match value {
		Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
		other => scalar_string(other).into_iter().collect(),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn builds_candidates_with_typed_metadata() {
		let json = json!({
			"hits": { "hits": [{
				"_id": "ua-1",
				"_score": 7.5,
				"_source": {
					"name": "Петро Порошенко",
					"entity_type": "individual",
					"entity_id": "E-1",
					"dob": "1965-09-26",
					"aliases": ["Petro Poroshenko"],
					"needs_context": true,
					"list_name": "UA-NSDC",
					"name_vector": [0.1, 0.2]
				},
				"matched_queries": ["phrase"]
			}]}
		});
		let hits = parse_hits(&json).expect("Failed to parse hits.");
		let candidate =
			candidate_from_hit(&hits[0], "name", &["name_vector"]).expect("Missing candidate.");

		assert_eq!(hits[0].matched_queries, vec!["phrase".to_string()]);
		assert_eq!(candidate.doc_id, "ua-1");
		assert_eq!(candidate.text, "Петро Порошенко");
		assert_eq!(candidate.entity_type, EntityType::Person);
		assert_eq!(candidate.metadata.entity_id.as_deref(), Some("E-1"));
		assert_eq!(candidate.metadata.aliases, vec!["Petro Poroshenko".to_string()]);
		assert!(candidate.metadata.needs_context);
		assert_eq!(candidate.metadata.extra.get("list_name"), Some(&json!("UA-NSDC")));
		assert!(!candidate.metadata.extra.contains_key("name_vector"));
	}

	#[test]
	fn hits_without_text_are_skipped() {
		let hit = Hit {
			id: "x".to_string(),
			score: 1.0,
			source: Map::new(),
			matched_queries: Vec::new(),
		};

		assert!(candidate_from_hit(&hit, "name", &[]).is_none());
	}

	#[test]
	fn missing_hits_array_is_invalid() {
		assert!(matches!(parse_hits(&json!({})), Err(Error::InvalidResponse { .. })));
	}
}
