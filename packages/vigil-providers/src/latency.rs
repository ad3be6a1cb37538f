use std::{collections::VecDeque, sync::Mutex, time::Duration};

use serde::Serialize;

use vigil_domain::cmp_score_desc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
	pub count: usize,
	pub avg_ms: f64,
	pub p95_ms: f64,
}

/// Ring buffer over the most recent request latencies.
#[derive(Debug)]
pub struct LatencyTracker {
	capacity: usize,
	samples: Mutex<VecDeque<f64>>,
}
impl LatencyTracker {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);

		Self { capacity, samples: Mutex::new(VecDeque::with_capacity(capacity)) }
	}

	pub fn record(&self, elapsed: Duration) {
		self.record_ms(elapsed.as_secs_f64() * 1_000.0);
	}

	pub fn record_ms(&self, latency_ms: f64) {
		let mut samples = self.samples.lock().unwrap_or_else(|err| err.into_inner());

		if samples.len() == self.capacity {
			samples.pop_front();
		}

		samples.push_back(latency_ms);
	}

	pub fn stats(&self) -> LatencyStats {
		let mut sorted: Vec<f64> = {
			let samples = self.samples.lock().unwrap_or_else(|err| err.into_inner());

			samples.iter().copied().collect()
		};

		if sorted.is_empty() {
			return LatencyStats::default();
		}

		sorted.sort_by(|a, b| a.total_cmp(b));

		let avg_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;

		LatencyStats { count: sorted.len(), avg_ms, p95_ms: percentile(&sorted, 95.0) }
	}
}

/// Nearest-rank percentile over an ascending slice. Returns 0.0 for an empty slice.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
	if sorted.is_empty() {
		return 0.0;
	}

	let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
	let index = rank.clamp(1, sorted.len()) - 1;

	sorted[index]
}

/// Population variance of candidate scores.
pub fn score_variance(scores: &[f32]) -> f32 {
	if scores.len() < 2 {
		return 0.0;
	}

	let mean = scores.iter().sum::<f32>() / scores.len() as f32;

	scores.iter().map(|score| (score - mean).powi(2)).sum::<f32>() / scores.len() as f32
}

/// Highest finite score, if any.
pub fn best_score(scores: impl IntoIterator<Item = f32>) -> Option<f32> {
	scores.into_iter().filter(|score| score.is_finite()).min_by(|a, b| cmp_score_desc(*a, *b))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ring_buffer_keeps_latest_samples() {
		let tracker = LatencyTracker::new(3);

		for ms in [100.0, 1.0, 2.0, 3.0] {
			tracker.record_ms(ms);
		}

		let stats = tracker.stats();

		assert_eq!(stats.count, 3);
		assert!((stats.avg_ms - 2.0).abs() < 1e-9);
		assert!((stats.p95_ms - 3.0).abs() < 1e-9);
	}

	#[test]
	fn percentile_uses_nearest_rank() {
		let sorted: Vec<f64> = (1..=100).map(f64::from).collect();

		assert!((percentile(&sorted, 95.0) - 95.0).abs() < 1e-9);
		assert!((percentile(&sorted, 99.0) - 99.0).abs() < 1e-9);
		assert_eq!(percentile(&[], 95.0), 0.0);
	}

	#[test]
	fn variance_and_best_score() {
		assert_eq!(score_variance(&[0.9]), 0.0);
		assert!((score_variance(&[0.0, 1.0]) - 0.25).abs() < 1e-6);
		assert_eq!(best_score([0.2, f32::NAN, 0.7]), Some(0.7));
		assert_eq!(best_score(Vec::new()), None);
	}
}
