pub mod ac;
pub mod client;
pub mod embedding;
pub mod hits;
pub mod latency;
pub mod vector;

mod error;

pub use ac::AcBackend;
pub use client::{BackendHealth, EsClient, HealthStatus};
pub use embedding::{HttpEmbedding, fallback_vector};
pub use error::{Error, Result};
pub use latency::{LatencyStats, LatencyTracker};
pub use vector::VectorBackend;

use std::{future::Future, pin::Pin, time::Duration};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};
use serde_json::{Map, Value};

use vigil_domain::{Candidate, SearchOptions};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Query payload accepted by a [`SearchBackend`].
#[derive(Debug, Clone, Copy)]
pub enum BackendQuery<'a> {
	Text(&'a str),
	Vector(&'a [f32]),
}
impl BackendQuery<'_> {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Text(_) => "text",
			Self::Vector(_) => "vector",
		}
	}
}

/// A scored-document source. AC, Vector and test doubles all implement this.
///
/// `search` returns an empty list, not an error, when the backend is unreachable after retries;
/// callers distinguish that case through [`SearchBackend::is_connected`]. Errors are reserved for
/// requests that no retry can fix.
pub trait SearchBackend
where
	Self: Send + Sync,
{
	fn name(&self) -> &str;

	fn search<'a>(
		&'a self,
		query: BackendQuery<'a>,
		options: &'a SearchOptions,
	) -> BoxFuture<'a, Result<Vec<Candidate>>>;

	fn health_check(&self) -> BoxFuture<'_, BackendHealth>;

	fn latency_stats(&self) -> LatencyStats;

	fn is_connected(&self) -> bool;
}

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub fn auth_headers(
	api_key: Option<&str>,
	default_headers: &Map<String, Value>,
) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if let Some(api_key) = api_key {
		headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);
	}

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: "Default header values must be strings.".to_string(),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`, exponent capped.
pub fn backoff_for_attempt(base: Duration, attempt: u32) -> Duration {
	let exp = attempt.max(1).saturating_sub(1).min(MAX_BACKOFF_EXPONENT);

	base.saturating_mul(1 << exp)
}
