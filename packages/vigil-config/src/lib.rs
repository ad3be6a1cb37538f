mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Backend, Cache, Config, Embedding, Escalation, Fusion, Monitor, Processing, Search, Service,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	parse(&raw).map_err(|err| match err {
		Error::ParseConfig { source, .. } => Error::ParseConfig { path: path.to_path_buf(), source },
		other => other,
	})
}

pub fn parse(raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw)
		.map_err(|err| Error::ParseConfig { path: Default::default(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.backend.url.trim().is_empty() {
		return Err(Error::Validation { message: "backend.url must be non-empty.".to_string() });
	}

	for (label, value) in [
		("backend.ac_index", &cfg.backend.ac_index),
		("backend.vector_index", &cfg.backend.vector_index),
		("backend.vector_field", &cfg.backend.vector_field),
		("backend.phrase_field", &cfg.backend.phrase_field),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if cfg.backend.text_fields.iter().all(|field| field.trim().is_empty()) {
		return Err(Error::Validation {
			message: "backend.text_fields must contain at least one field.".to_string(),
		});
	}
	if cfg.backend.vector_dim == 0 {
		return Err(Error::Validation {
			message: "backend.vector_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.backend.max_k == 0 {
		return Err(Error::Validation {
			message: "backend.max_k must be greater than zero.".to_string(),
		});
	}
	if cfg.backend.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "backend.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.backend.latency_window == 0 {
		return Err(Error::Validation {
			message: "backend.latency_window must be greater than zero.".to_string(),
		});
	}
	if cfg.embedding.dimensions != cfg.backend.vector_dim {
		return Err(Error::Validation {
			message: "embedding.dimensions must match backend.vector_dim.".to_string(),
		});
	}
	if cfg.embedding.enabled && cfg.embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "embedding.api_key must be non-empty when embedding is enabled.".to_string(),
		});
	}
	if !(1..=1_000).contains(&cfg.search.top_k) {
		return Err(Error::Validation {
			message: "search.top_k must be in the range 1-1000.".to_string(),
		});
	}
	if !(100..=30_000).contains(&cfg.search.timeout_ms) {
		return Err(Error::Validation {
			message: "search.timeout_ms must be in the range 100-30000.".to_string(),
		});
	}
	if cfg.search.ac_fuzziness > 3 {
		return Err(Error::Validation {
			message: "search.ac_fuzziness must be in the range 0-3.".to_string(),
		});
	}

	for (label, value) in [
		("search.ac_boost", cfg.search.ac_boost),
		("search.ac_min_score", cfg.search.ac_min_score),
		("search.vector_boost", cfg.search.vector_boost),
		("search.vector_min_score", cfg.search.vector_min_score),
		("backend.phrase_boost", cfg.backend.phrase_boost),
		("escalation.min_ac_score", cfg.escalation.min_ac_score),
		("escalation.max_score_variance", cfg.escalation.max_score_variance),
		("escalation.vector_preference_margin", cfg.escalation.vector_preference_margin),
		("fusion.anchor_bonus", cfg.fusion.anchor_bonus),
		("fusion.context_penalty", cfg.fusion.context_penalty),
	] {
		ensure_non_negative(label, value)?;
	}
	for (label, value) in [
		("escalation.vector_fallback_min_cosine", cfg.escalation.vector_fallback_min_cosine),
		("fusion.ac_weight", cfg.fusion.ac_weight),
		("fusion.vector_weight", cfg.fusion.vector_weight),
		("fusion.formula_ac_weight", cfg.fusion.formula_ac_weight),
		("fusion.formula_vector_weight", cfg.fusion.formula_vector_weight),
		("fusion.fuzzy_weight", cfg.fusion.fuzzy_weight),
	] {
		ensure_unit_range(label, value)?;
	}

	if !matches!(cfg.fusion.strategy.as_str(), "weighted" | "formula") {
		return Err(Error::Validation {
			message: "fusion.strategy must be one of weighted or formula.".to_string(),
		});
	}
	if !cfg.fusion.anchor_boost_factor.is_finite() || cfg.fusion.anchor_boost_factor < 1.0 {
		return Err(Error::Validation {
			message: "fusion.anchor_boost_factor must be a finite number of at least 1.0."
				.to_string(),
		});
	}

	for (label, value) in [
		("cache.embedding_capacity", cfg.cache.embedding_capacity),
		("cache.result_capacity", cfg.cache.result_capacity),
		("cache.query_capacity", cfg.cache.query_capacity),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}
	for (label, value) in [
		("cache.embedding_ttl_secs", cfg.cache.embedding_ttl_secs),
		("cache.result_ttl_secs", cfg.cache.result_ttl_secs),
		("cache.query_ttl_secs", cfg.cache.query_ttl_secs),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.monitor.history_limit == 0 {
		return Err(Error::Validation {
			message: "monitor.history_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.monitor.rate_limit_per_minute == 0 {
		return Err(Error::Validation {
			message: "monitor.rate_limit_per_minute must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn ensure_non_negative(label: &str, value: f32) -> Result<()> {
	if !value.is_finite() {
		return Err(Error::Validation { message: format!("{label} must be a finite number.") });
	}
	if value < 0.0 {
		return Err(Error::Validation { message: format!("{label} must be zero or greater.") });
	}

	Ok(())
}

fn ensure_unit_range(label: &str, value: f32) -> Result<()> {
	if !value.is_finite() {
		return Err(Error::Validation { message: format!("{label} must be a finite number.") });
	}
	if !(0.0..=1.0).contains(&value) {
		return Err(Error::Validation {
			message: format!("{label} must be in the range 0.0-1.0."),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.backend.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
		cfg.backend.api_key = None;
	}

	cfg.backend.url = cfg.backend.url.trim().trim_end_matches('/').to_string();
	cfg.embedding.api_base = cfg.embedding.api_base.trim().trim_end_matches('/').to_string();
	cfg.backend.text_fields.retain(|field| !field.trim().is_empty());
}
