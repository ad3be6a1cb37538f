use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
};

use time::{Duration, OffsetDateTime};

const WINDOW: Duration = Duration::seconds(60);

/// Sliding one-minute admission window per client.
#[derive(Debug, Default)]
pub struct RateLimiter {
	clients: Mutex<HashMap<String, VecDeque<OffsetDateTime>>>,
}
impl RateLimiter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn check(&self, client_id: &str, max_per_minute: u32) -> bool {
		self.check_at(client_id, max_per_minute, OffsetDateTime::now_utc())
	}

	/// Admits the request when fewer than `max_per_minute` requests from `client_id` fall inside
	/// the last 60 seconds, and records it. Rejected requests are not recorded.
	pub fn check_at(&self, client_id: &str, max_per_minute: u32, now: OffsetDateTime) -> bool {
		let mut clients = self.clients.lock().unwrap_or_else(|err| err.into_inner());
		let window = clients.entry(client_id.to_string()).or_default();

		while window.front().is_some_and(|at| now - *at >= WINDOW) {
			window.pop_front();
		}

		if window.len() >= max_per_minute as usize {
			if window.is_empty() {
				clients.remove(client_id);
			}

			return false;
		}

		window.push_back(now);

		true
	}

	pub fn prune(&self) -> usize {
		self.prune_at(OffsetDateTime::now_utc())
	}

	/// Drops clients with no request inside the window.
	pub fn prune_at(&self, now: OffsetDateTime) -> usize {
		let mut clients = self.clients.lock().unwrap_or_else(|err| err.into_inner());
		let before = clients.len();

		clients.retain(|_, window| window.back().is_some_and(|at| now - *at < WINDOW));

		before - clients.len()
	}

	pub fn client_count(&self) -> usize {
		self.clients.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn reset(&self) {
		self.clients.lock().unwrap_or_else(|err| err.into_inner()).clear();
	}
}
