//! Request telemetry: bounded history, running counters and derived latency statistics.

use std::{
	collections::{BTreeMap, VecDeque},
	sync::Mutex,
};

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use vigil_domain::QueryMode;
use vigil_providers::latency::percentile;

/// One `find_candidates` outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPerformance {
	pub query: String,
	pub mode: QueryMode,
	pub duration_ms: f64,
	pub result_count: usize,
	pub cache_hit: bool,
	pub escalated: bool,
	pub error: Option<String>,
	pub at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
	pub total_requests: u64,
	pub successful_requests: u64,
	pub failed_requests: u64,
	pub cache_hits: u64,
	pub escalations: u64,
	pub total_results: u64,
	pub requests_by_mode: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModeStats {
	pub requests: usize,
	pub avg_latency_ms: f64,
	pub error_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
	pub total_requests: usize,
	pub avg_latency_ms: f64,
	pub p95_latency_ms: f64,
	pub p99_latency_ms: f64,
	pub cache_hit_rate: f64,
	pub error_rate: f64,
	pub requests_per_second: f64,
	pub avg_results: f64,
	pub by_mode: BTreeMap<String, ModeStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
	pub counters: MetricsSnapshot,
	pub stats: PerformanceStats,
}

#[derive(Debug, Default)]
struct MonitorState {
	history: VecDeque<QueryPerformance>,
	counters: MetricsSnapshot,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
	history_limit: usize,
	state: Mutex<MonitorState>,
}
impl PerformanceMonitor {
	pub fn new(history_limit: usize) -> Self {
		Self { history_limit: history_limit.max(1), state: Mutex::new(MonitorState::default()) }
	}

	/// The only mutation path for history and counters.
	pub fn record_query_performance(&self, record: QueryPerformance) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let counters = &mut state.counters;

		counters.total_requests += 1;

		if record.error.is_some() {
			counters.failed_requests += 1;
		} else {
			counters.successful_requests += 1;
		}
		if record.cache_hit {
			counters.cache_hits += 1;
		}
		if record.escalated {
			counters.escalations += 1;
		}

		counters.total_results += record.result_count as u64;

		*counters.requests_by_mode.entry(record.mode.as_str().to_string()).or_default() += 1;

		if state.history.len() == self.history_limit {
			state.history.pop_front();
		}

		state.history.push_back(record);
	}

	/// Statistics over the whole retained history, or over the last `window_minutes` before `now`.
	pub fn performance_stats_at(
		&self,
		window_minutes: Option<u32>,
		now: OffsetDateTime,
	) -> PerformanceStats {
		let state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let window = window_minutes.map(|minutes| Duration::minutes(i64::from(minutes)));
		let records: Vec<&QueryPerformance> = state
			.history
			.iter()
			.filter(|record| window.map(|window| now - record.at <= window).unwrap_or(true))
			.collect();

		if records.is_empty() {
			return PerformanceStats::default();
		}

		let total = records.len() as f64;
		let mut latencies: Vec<f64> = records.iter().map(|record| record.duration_ms).collect();

		latencies.sort_by(|a, b| a.total_cmp(b));

		let errors = records.iter().filter(|record| record.error.is_some()).count();
		let cache_hits = records.iter().filter(|record| record.cache_hit).count();
		let results: usize = records.iter().map(|record| record.result_count).sum();
		let span_secs = match window {
			Some(window) => window.as_seconds_f64(),
			None => {
				let first = records.iter().map(|record| record.at).min().unwrap_or(now);
				let last = records.iter().map(|record| record.at).max().unwrap_or(now);

				(last - first).as_seconds_f64()
			},
		};

		PerformanceStats {
			total_requests: records.len(),
			avg_latency_ms: latencies.iter().sum::<f64>() / total,
			p95_latency_ms: percentile(&latencies, 95.0),
			p99_latency_ms: percentile(&latencies, 99.0),
			cache_hit_rate: cache_hits as f64 / total,
			error_rate: errors as f64 / total,
			requests_per_second: total / span_secs.max(1.0),
			avg_results: results as f64 / total,
			by_mode: mode_breakdown(&records),
		}
	}

	pub fn performance_stats(&self, window_minutes: Option<u32>) -> PerformanceStats {
		self.performance_stats_at(window_minutes, OffsetDateTime::now_utc())
	}

	pub fn get_metrics(&self) -> Metrics {
		let stats = self.performance_stats(None);
		let counters = self.state.lock().unwrap_or_else(|err| err.into_inner()).counters.clone();

		Metrics { counters, stats }
	}

	pub fn reset(&self) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		state.history.clear();
		state.counters = MetricsSnapshot::default();
	}
}

fn mode_breakdown(records: &[&QueryPerformance]) -> BTreeMap<String, ModeStats> {
	let mut grouped: BTreeMap<String, (usize, f64, usize)> = BTreeMap::new();

	for record in records {
		let entry = grouped.entry(record.mode.as_str().to_string()).or_default();

		entry.0 += 1;
		entry.1 += record.duration_ms;

		if record.error.is_some() {
			entry.2 += 1;
		}
	}

	grouped
		.into_iter()
		.map(|(mode, (requests, latency_sum, errors))| {
			let stats = ModeStats {
				requests,
				avg_latency_ms: latency_sum / requests as f64,
				error_rate: errors as f64 / requests as f64,
			};

			(mode, stats)
		})
		.collect()
}
