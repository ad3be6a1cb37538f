use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EntityType, Error, Result};

pub const MAX_TOP_K: u32 = 1_000;
pub const MIN_TIMEOUT_MS: u64 = 100;
pub const MAX_TIMEOUT_MS: u64 = 30_000;
pub const MAX_FUZZINESS: u8 = 3;

/// Requested execution path. `Auto` runs AC first and escalates to vector search on weak results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
	#[default]
	Auto,
	Ac,
	Vector,
	Hybrid,
}
impl QueryMode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Auto => "auto",
			Self::Ac => "ac",
			Self::Vector => "vector",
			Self::Hybrid => "hybrid",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcTuning {
	pub boost: f32,
	pub fuzziness: u8,
	pub min_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorTuning {
	pub boost: f32,
	pub min_score: f32,
	pub ef_search: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationTuning {
	pub enabled: bool,
	/// Best AC score below which the request escalates to vector search.
	pub threshold: f32,
	/// Candidate pool size handed to the kNN search.
	pub max_results: u32,
}

/// A single metadata constraint. Objects with `min`/`max` are ranges, arrays are membership
/// checks, everything else is equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataFilter {
	AnyOf(Vec<Value>),
	Range(RangeFilter),
	Equals(Value),
}
impl MetadataFilter {
	pub fn matches(&self, field: Option<&Value>) -> bool {
		let Some(field) = field else { return false };

		match self {
			Self::Equals(expected) => match field {
				Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
				_ => values_equal(field, expected),
			},
			Self::AnyOf(allowed) => match field {
				Value::Array(items) =>
					items.iter().any(|item| allowed.iter().any(|value| values_equal(item, value))),
				_ => allowed.iter().any(|value| values_equal(field, value)),
			},
			Self::Range(range) => {
				let Some(number) = as_number(field) else { return false };

				range.min.map(|min| number >= min).unwrap_or(true)
					&& range.max.map(|max| number <= max).unwrap_or(true)
			},
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeFilter {
	pub min: Option<f64>,
	pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
	pub top_k: u32,
	pub score_threshold: f32,
	pub search_mode: QueryMode,
	pub ac: AcTuning,
	pub vector: VectorTuning,
	pub escalation: EscalationTuning,
	#[serde(default)]
	pub entity_types: Vec<EntityType>,
	#[serde(default)]
	pub metadata_filters: BTreeMap<String, MetadataFilter>,
	pub timeout_ms: u64,
}
impl SearchOptions {
	pub fn from_config(search: &vigil_config::Search, escalation: &vigil_config::Escalation) -> Self {
		Self {
			top_k: search.top_k,
			score_threshold: 0.0,
			search_mode: QueryMode::Auto,
			ac: AcTuning {
				boost: search.ac_boost,
				fuzziness: search.ac_fuzziness,
				min_score: search.ac_min_score,
			},
			vector: VectorTuning {
				boost: search.vector_boost,
				min_score: search.vector_min_score,
				ef_search: search.vector_ef_search,
			},
			escalation: EscalationTuning {
				enabled: true,
				threshold: escalation.min_ac_score,
				max_results: search.max_escalation_results,
			},
			entity_types: Vec::new(),
			metadata_filters: BTreeMap::new(),
			timeout_ms: search.timeout_ms,
		}
	}

	pub fn with_mode(self, search_mode: QueryMode) -> Self {
		Self { search_mode, ..self }
	}

	pub fn with_top_k(self, top_k: u32) -> Self {
		Self { top_k, ..self }
	}

	pub fn validate(&self) -> Result<()> {
		if !(1..=MAX_TOP_K).contains(&self.top_k) {
			return Err(Error::InvalidOptions {
				message: format!("top_k must be in the range 1-{MAX_TOP_K}."),
			});
		}
		if !self.score_threshold.is_finite() || !(0.0..=1.0).contains(&self.score_threshold) {
			return Err(Error::InvalidOptions {
				message: "score_threshold must be in the range 0.0-1.0.".to_string(),
			});
		}
		if self.ac.fuzziness > MAX_FUZZINESS {
			return Err(Error::InvalidOptions {
				message: format!("ac.fuzziness must be in the range 0-{MAX_FUZZINESS}."),
			});
		}
		if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.timeout_ms) {
			return Err(Error::InvalidOptions {
				message: format!(
					"timeout_ms must be in the range {MIN_TIMEOUT_MS}-{MAX_TIMEOUT_MS}."
				),
			});
		}

		for (label, value) in [
			("ac.boost", self.ac.boost),
			("ac.min_score", self.ac.min_score),
			("vector.boost", self.vector.boost),
			("vector.min_score", self.vector.min_score),
			("escalation.threshold", self.escalation.threshold),
		] {
			if !value.is_finite() || value < 0.0 {
				return Err(Error::InvalidOptions {
					message: format!("{label} must be a finite number of zero or greater."),
				});
			}
		}

		if self.escalation.enabled && self.escalation.max_results == 0 {
			return Err(Error::InvalidOptions {
				message: "escalation.max_results must be greater than zero.".to_string(),
			});
		}

		for (key, filter) in &self.metadata_filters {
			if let MetadataFilter::Range(RangeFilter { min: Some(min), max: Some(max) }) = filter
				&& min > max
			{
				return Err(Error::InvalidOptions {
					message: format!("metadata_filters.{key} has min greater than max."),
				});
			}
		}

		Ok(())
	}
}
impl Default for SearchOptions {
	fn default() -> Self {
		Self::from_config(&vigil_config::Search::default(), &vigil_config::Escalation::default())
	}
}

fn values_equal(left: &Value, right: &Value) -> bool {
	match (left, right) {
		(Value::String(left), Value::String(right)) => left.trim().eq_ignore_ascii_case(right.trim()),
		(Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(left), as_number(right)) {
			(Some(left), Some(right)) => (left - right).abs() < f64::EPSILON,
			_ => false,
		},
		_ => left == right,
	}
}

fn as_number(value: &Value) -> Option<f64> {
	match value {
		Value::Number(number) => number.as_f64(),
		Value::String(text) => text.trim().parse().ok(),
		_ => None,
	}
}
