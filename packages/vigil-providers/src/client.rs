use std::{
	sync::Mutex,
	time::{Duration, Instant},
};

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::{Error, LatencyStats, LatencyTracker, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
	Healthy,
	Degraded,
	Unhealthy,
}
impl HealthStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Healthy => "healthy",
			Self::Degraded => "degraded",
			Self::Unhealthy => "unhealthy",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendHealth {
	pub name: String,
	pub status: HealthStatus,
	pub connected: bool,
	pub latency: LatencyStats,
}

#[derive(Debug)]
struct ConnectionState {
	connected: bool,
	last_checked: Option<Instant>,
}
impl ConnectionState {
	fn probe_due(&self, now: Instant, interval: Duration) -> bool {
		match self.last_checked {
			Some(at) => now.saturating_duration_since(at) >= interval,
			None => true,
		}
	}
}

/// HTTP client for an Elasticsearch-compatible `_search` API with retry, backoff and
/// connection-health tracking.
#[derive(Debug)]
pub struct EsClient {
	name: String,
	http: Client,
	base_url: String,
	max_retries: u32,
	base_backoff: Duration,
	health_interval: Duration,
	state: Mutex<ConnectionState>,
	latency: LatencyTracker,
}
impl EsClient {
	pub fn new(name: impl Into<String>, cfg: &vigil_config::Backend) -> Result<Self> {
		let headers = crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?;
		let http = Client::builder()
			.default_headers(headers)
			.timeout(Duration::from_millis(cfg.timeout_ms))
			.build()?;

		Ok(Self {
			name: name.into(),
			http,
			base_url: cfg.url.trim_end_matches('/').to_string(),
			max_retries: cfg.max_retries,
			base_backoff: Duration::from_millis(cfg.base_backoff_ms),
			health_interval: Duration::from_secs(cfg.health_check_interval_secs),
			state: Mutex::new(ConnectionState { connected: true, last_checked: None }),
			latency: LatencyTracker::new(cfg.latency_window),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn is_connected(&self) -> bool {
		self.state.lock().unwrap_or_else(|err| err.into_inner()).connected
	}

	pub fn latency_stats(&self) -> LatencyStats {
		self.latency.stats()
	}

	/// Runs `body` against `index`. Returns `None` once the initial attempt and every retry have
	/// failed, leaving the client disconnected; also `None` without a request while the client is
	/// disconnected and no health probe is due.
	pub async fn search(&self, index: &str, body: &Value, timeout: Duration) -> Option<Value> {
		if !self.ensure_connected().await {
			tracing::warn!(backend = %self.name, "Backend disconnected; skipping search.");

			return None;
		}

		let url = format!("{}/{index}/_search", self.base_url);
		let attempts = self.max_retries.saturating_add(1);
		let mut last_error = None;

		for attempt in 1..=attempts {
			let started = Instant::now();

			match self.post_json(&url, body, timeout).await {
				Ok(json) => {
					self.latency.record(started.elapsed());
					self.set_connected(true, None);

					return Some(json);
				},
				Err(err) => {
					tracing::debug!(
						backend = %self.name,
						attempt,
						error = %err,
						"Backend request failed."
					);

					last_error = Some(err);
				},
			}

			if attempt < attempts {
				tokio::time::sleep(crate::backoff_for_attempt(self.base_backoff, attempt)).await;
			}
		}

		self.set_connected(false, Some(Instant::now()));

		if let Some(err) = last_error {
			tracing::warn!(
				backend = %self.name,
				attempts,
				error = %err,
				"Backend unavailable after retries; marking disconnected."
			);
		}

		None
	}

	/// Probes the cluster health endpoint and updates the connection flag.
	pub async fn health_check(&self) -> BackendHealth {
		let connected = self.probe().await;

		BackendHealth {
			name: self.name.clone(),
			status: if connected { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
			connected,
			latency: self.latency.stats(),
		}
	}

	async fn ensure_connected(&self) -> bool {
		let due = {
			let state = self.state.lock().unwrap_or_else(|err| err.into_inner());

			if state.connected {
				return true;
			}

			state.probe_due(Instant::now(), self.health_interval)
		};

		if !due {
			return false;
		}

		self.probe().await
	}

	async fn probe(&self) -> bool {
		let url = format!("{}/_cluster/health", self.base_url);
		let connected = match self.http.get(url).send().await {
			Ok(res) => res.status().is_success(),
			Err(err) => {
				tracing::debug!(backend = %self.name, error = %err, "Health probe failed.");

				false
			},
		};

		self.set_connected(connected, Some(Instant::now()));

		connected
	}

	async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<Value> {
		let res = self.http.post(url).timeout(timeout).json(body).send().await?;
		let status = res.status();

		if !status.is_success() {
			return Err(Error::Status { status });
		}

		Ok(res.json().await?)
	}

	fn set_connected(&self, connected: bool, checked_at: Option<Instant>) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		state.connected = connected;

		if checked_at.is_some() {
			state.last_checked = checked_at;
		}
	}
}
