use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
	#[default]
	Person,
	Organization,
}
impl EntityType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Person => "person",
			Self::Organization => "organization",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"person" | "individual" => Some(Self::Person),
			"organization" | "organisation" | "entity" | "company" => Some(Self::Organization),
			_ => None,
		}
	}
}

/// Which search path produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchMode {
	Ac,
	Vector,
	Hybrid,
	Fuzzy,
	FallbackAc,
	FallbackVector,
}
impl SearchMode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Ac => "AC",
			Self::Vector => "VECTOR",
			Self::Hybrid => "HYBRID",
			Self::Fuzzy => "FUZZY",
			Self::FallbackAc => "FALLBACK_AC",
			Self::FallbackVector => "FALLBACK_VECTOR",
		}
	}
}

/// Fusion provenance of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
	Ac,
	Vector,
	Hybrid,
}
impl MatchSource {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Ac => "ac",
			Self::Vector => "vector",
			Self::Hybrid => "hybrid",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
	/// Watchlist entity id shared by all documents describing the same entity.
	pub entity_id: Option<String>,
	pub country: Option<String>,
	pub dob: Option<String>,
	pub source: Option<String>,
	#[serde(default)]
	pub aliases: Vec<String>,
	#[serde(default)]
	pub document_ids: Vec<String>,
	#[serde(default)]
	pub needs_context: bool,
	#[serde(default)]
	pub extra: BTreeMap<String, Value>,
}
impl CandidateMetadata {
	/// Resolves a filter key against the well-known fields first, then the extension map.
	pub fn field(&self, key: &str) -> Option<Value> {
		match key {
			"entity_id" | "id" => self.entity_id.clone().map(Value::String),
			"country" => self.country.clone().map(Value::String),
			"dob" => self.dob.clone().map(Value::String),
			"source" => self.source.clone().map(Value::String),
			"aliases" => Some(Value::from(self.aliases.clone())),
			"document_ids" => Some(Value::from(self.document_ids.clone())),
			"needs_context" => Some(Value::Bool(self.needs_context)),
			_ => self.extra.get(key).cloned(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateTrace {
	pub tier: Option<u8>,
	pub reason: Option<String>,
	pub source: Option<MatchSource>,
	pub ac_score: Option<f32>,
	pub vector_score: Option<f32>,
	pub cosine: Option<f32>,
	pub fuzz: Option<f32>,
	pub overlap: Option<f32>,
	#[serde(default)]
	pub anchors: Vec<String>,
	#[serde(default)]
	pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
	pub doc_id: String,
	pub score: f32,
	pub text: String,
	pub entity_type: EntityType,
	pub metadata: CandidateMetadata,
	pub search_mode: SearchMode,
	pub match_fields: Vec<String>,
	pub confidence: f32,
	pub trace: CandidateTrace,
}
impl Candidate {
	pub fn new(doc_id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
		Self {
			doc_id: doc_id.into(),
			score,
			text: text.into(),
			entity_type: EntityType::default(),
			metadata: CandidateMetadata::default(),
			search_mode: SearchMode::Ac,
			match_fields: Vec::new(),
			confidence: score.clamp(0.0, 1.0),
			trace: CandidateTrace::default(),
		}
	}

	pub fn with_mode(mut self, mode: SearchMode) -> Self {
		self.search_mode = mode;

		self
	}

	pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
		self.entity_type = entity_type;

		self
	}

	pub fn with_metadata(mut self, metadata: CandidateMetadata) -> Self {
		self.metadata = metadata;

		self
	}
}
