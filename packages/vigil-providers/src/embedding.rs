use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{BoxFuture, EmbeddingProvider, Error, Result};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
	model: &'a str,
	input: &'a [String],
	dimensions: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
	data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
	index: Option<usize>,
	embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client. One HTTP client, with auth and default headers
/// applied, serves every request.
#[derive(Debug, Clone)]
pub struct HttpEmbedding {
	http: Client,
	url: String,
	model: String,
	dimensions: u32,
}
impl HttpEmbedding {
	pub fn new(cfg: &vigil_config::Embedding) -> Result<Self> {
		let api_key = Some(cfg.api_key.as_str()).filter(|key| !key.is_empty());
		let headers = crate::auth_headers(api_key, &cfg.default_headers)?;
		let http = Client::builder()
			.default_headers(headers)
			.timeout(Duration::from_millis(cfg.timeout_ms))
			.build()?;

		Ok(Self {
			http,
			url: format!("{}{}", cfg.api_base.trim_end_matches('/'), cfg.path),
			model: cfg.model.clone(),
			dimensions: cfg.dimensions,
		})
	}

	async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let body =
			EmbeddingRequest { model: &self.model, input: texts, dimensions: self.dimensions };
		let response: EmbeddingResponse =
			self.http.post(&self.url).json(&body).send().await?.error_for_status()?.json().await?;

		tracing::debug!(inputs = texts.len(), vectors = response.data.len(), "Embedding received.");

		order_embeddings(response, texts.len())
	}
}
impl EmbeddingProvider for HttpEmbedding {
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(self.request(texts))
	}
}

/// Deterministic unit vector derived from the blake3 XOF of `text`.
pub fn fallback_vector(text: &str, dimensions: usize) -> Vec<f32> {
	let mut reader = blake3::Hasher::new().update(text.as_bytes()).finalize_xof();
	let mut bytes = vec![0_u8; dimensions * 4];

	reader.fill(&mut bytes);

	let mut vector: Vec<f32> = bytes
		.chunks_exact(4)
		.map(|chunk| {
			let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);

			(raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
		})
		.collect();
	let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();

	if norm > 0.0 {
		for value in &mut vector {
			*value /= norm;
		}
	}

	vector
}

/// Orders vectors by their `index` (position when absent) and checks one vector per input.
fn order_embeddings(response: EmbeddingResponse, inputs: usize) -> Result<Vec<Vec<f32>>> {
	let mut items: Vec<(usize, Vec<f32>)> = response
		.data
		.into_iter()
		.enumerate()
		.map(|(position, item)| (item.index.unwrap_or(position), item.embedding))
		.collect();

	if items.len() != inputs {
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding response returned {} vectors for {inputs} inputs.",
				items.len()
			),
		});
	}

	items.sort_by_key(|(index, _)| *index);

	Ok(items.into_iter().map(|(_, embedding)| embedding).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn response(json: serde_json::Value) -> EmbeddingResponse {
		serde_json::from_value(json).expect("Response should deserialize.")
	}

	#[test]
	fn embeddings_follow_their_index() {
		let response = response(serde_json::json!({
			"data": [
				{ "index": 1, "embedding": [2.0, 3.0] },
				{ "index": 0, "embedding": [0.5, 1.5] }
			]
		}));
		let vectors = order_embeddings(response, 2).expect("Vectors should be ordered.");

		assert_eq!(vectors, vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
	}

	#[test]
	fn missing_index_keeps_position_and_count_is_checked() {
		let unindexed = response(serde_json::json!({ "data": [{ "embedding": [1.0] }] }));

		assert_eq!(order_embeddings(unindexed, 1).expect("Single vector."), vec![vec![1.0]]);

		let short = response(serde_json::json!({ "data": [{ "embedding": [1.0] }] }));

		assert!(matches!(order_embeddings(short, 2), Err(Error::InvalidResponse { .. })));
	}

	#[test]
	fn non_numeric_values_are_rejected() {
		let parsed = serde_json::from_value::<EmbeddingResponse>(serde_json::json!({
			"data": [{ "embedding": ["x"] }]
		}));

		assert!(parsed.is_err());
	}

	#[test]
	fn fallback_vectors_are_deterministic_unit_vectors() {
		let first = fallback_vector("ivan petrov", 384);
		let second = fallback_vector("ivan petrov", 384);
		let other = fallback_vector("petro poroshenko", 384);
		let norm = first.iter().map(|value| value * value).sum::<f32>().sqrt();

		assert_eq!(first.len(), 384);
		assert_eq!(first, second);
		assert_ne!(first, other);
		assert!((norm - 1.0).abs() < 1e-4);
	}
}
