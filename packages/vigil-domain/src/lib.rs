pub mod anchor;
pub mod text;

mod candidate;
mod error;
mod options;

pub use candidate::{
	Candidate, CandidateMetadata, CandidateTrace, EntityType, MatchSource, SearchMode,
};
pub use error::{Error, Result};
pub use options::{
	AcTuning, EscalationTuning, MAX_FUZZINESS, MAX_TIMEOUT_MS, MAX_TOP_K, MIN_TIMEOUT_MS,
	MetadataFilter, QueryMode, RangeFilter, SearchOptions, VectorTuning,
};

/// Descending score order with NaN sorted last.
pub fn cmp_score_desc(a: f32, b: f32) -> std::cmp::Ordering {
	use std::cmp::Ordering;

	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}
