//! Ranking pipeline applied to raw executor output.
//!
//! Stages run in a fixed order: deduplicate, fuzzy rerank, anchor boost, metadata filter, cap and
//! validate. Each stage can be switched off through `[processing]`; score clamping always runs.

use std::collections::HashMap;

use vigil_domain::{Candidate, SearchOptions, anchor, cmp_score_desc, text};

const MIN_TEXT_CHARS: usize = 2;

#[derive(Debug, Clone)]
pub struct ResultProcessor {
	stages: vigil_config::Processing,
	fusion: vigil_config::Fusion,
}
impl ResultProcessor {
	pub fn new(stages: vigil_config::Processing, fusion: vigil_config::Fusion) -> Self {
		Self { stages, fusion }
	}

	/// `query` is the normalized query used for token overlap; `original_text` is the raw input
	/// used for fuzzy similarity and anchor detection.
	pub fn process(
		&self,
		candidates: Vec<Candidate>,
		query: &str,
		original_text: &str,
		options: &SearchOptions,
	) -> Vec<Candidate> {
		let similarity_source = if original_text.trim().is_empty() { query } else { original_text };
		let mut out = candidates;

		if self.stages.deduplicate {
			out = deduplicate(out);
		}
		if self.stages.fuzzy_rerank {
			out = fuzzy_rerank(out, similarity_source, self.fusion.fuzzy_weight);
		}
		if self.stages.anchor_boost {
			out = self.anchor_boost(out, query, similarity_source);
		}
		if self.stages.metadata_filter {
			out = filter_metadata(out, options);
		}

		out.truncate(options.top_k as usize);

		if self.stages.validate {
			out = validate_results(out);
		}

		clamp_scores(out)
	}

	/// Scales each score by token overlap with the query, then applies the anchor bonus and the
	/// needs-context penalty.
	pub fn anchor_boost(
		&self,
		mut candidates: Vec<Candidate>,
		query: &str,
		raw_query: &str,
	) -> Vec<Candidate> {
		let factor = self.fusion.anchor_boost_factor;

		for candidate in &mut candidates {
			let overlap = text::token_overlap_ratio(query, &candidate.text);
			let anchors = anchor::find_anchors(&candidate.metadata, raw_query);

			candidate.score *= 1.0 + overlap * (factor - 1.0);
			candidate.trace.overlap = Some(overlap);

			if !anchors.is_empty() {
				candidate.score += self.fusion.anchor_bonus;
				candidate.trace.anchors = anchors.iter().map(|name| name.to_string()).collect();
			}
			if candidate.metadata.needs_context {
				candidate.score -= self.fusion.context_penalty;
			}
		}

		sort_by_score(&mut candidates);

		candidates
	}
}

/// Collapses candidates with the same normalized text, keeping the higher score. The kept
/// candidate takes the position of the first occurrence.
pub fn deduplicate(candidates: Vec<Candidate>) -> Vec<Candidate> {
	let mut index: HashMap<String, usize> = HashMap::new();
	let mut out: Vec<Candidate> = Vec::with_capacity(candidates.len());

	for candidate in candidates {
		let key = text::normalize_text(&candidate.text);

		match index.get(&key) {
			Some(&slot) =>
				if candidate.score > out[slot].score {
					out[slot] = candidate;
				},
			None => {
				index.insert(key, out.len());
				out.push(candidate);
			},
		}
	}

	out
}

/// `score = (1 - weight) * score + weight * fuzzy_ratio`, then re-sorted.
pub fn fuzzy_rerank(mut candidates: Vec<Candidate>, query: &str, weight: f32) -> Vec<Candidate> {
	for candidate in &mut candidates {
		let fuzz = text::fuzzy_ratio(query, &candidate.text);

		candidate.score = (1.0 - weight) * candidate.score + weight * fuzz;
		candidate.trace.fuzz = Some(fuzz);
	}

	sort_by_score(&mut candidates);

	candidates
}

/// Drops candidates outside the requested entity types, below the score threshold, or failing
/// any metadata filter.
pub fn filter_metadata(candidates: Vec<Candidate>, options: &SearchOptions) -> Vec<Candidate> {
	candidates
		.into_iter()
		.filter(|candidate| {
			options.entity_types.is_empty() || options.entity_types.contains(&candidate.entity_type)
		})
		.filter(|candidate| candidate.score >= options.score_threshold)
		.filter(|candidate| {
			options
				.metadata_filters
				.iter()
				.all(|(key, filter)| filter.matches(candidate.metadata.field(key).as_ref()))
		})
		.collect()
}

/// Drops candidates whose text is blank or shorter than two characters and floors negative or
/// non-finite scores at zero.
pub fn validate_results(candidates: Vec<Candidate>) -> Vec<Candidate> {
	candidates
		.into_iter()
		.filter(|candidate| candidate.text.trim().chars().count() >= MIN_TEXT_CHARS)
		.map(|mut candidate| {
			candidate.score = floor_score(candidate.score);

			candidate
		})
		.collect()
}

/// N-way weighted merge. Each set is scaled by its weight (1.0 when missing), then the union is
/// deduplicated with the same key as [`deduplicate`] and sorted.
pub fn combine_result_sets(sets: Vec<Vec<Candidate>>, weights: &[f32]) -> Vec<Candidate> {
	let mut merged = Vec::new();

	for (position, set) in sets.into_iter().enumerate() {
		let weight = weights.get(position).copied().unwrap_or(1.0);

		merged.extend(set.into_iter().map(|mut candidate| {
			candidate.score *= weight;

			candidate
		}));
	}

	let mut out = deduplicate(merged);

	sort_by_score(&mut out);

	out
}

fn clamp_scores(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
	for candidate in &mut candidates {
		candidate.score = floor_score(candidate.score);
		candidate.confidence = candidate.score.clamp(0.0, 1.0);
	}

	candidates
}

fn floor_score(score: f32) -> f32 {
	if score.is_finite() && score > 0.0 { score } else { 0.0 }
}

fn sort_by_score(candidates: &mut [Candidate]) {
	candidates.sort_by(|a, b| cmp_score_desc(a.score, b.score));
}
