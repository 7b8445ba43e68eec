use std::net::IpAddr;

use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

/// Round-trip time assumed for a path before any sample arrived.
pub const BOOTSTRAP_RTT_MS: f64 = 50.0;

#[derive(Debug, Error)]
pub enum SchedulerError {
	#[error("no paths available")]
	NoPaths,
}

/// A transmit path with its current metrics and derived selection weight.
#[derive(Clone, Debug, PartialEq)]
pub struct PathMetrics {
	pub ip: IpAddr,
	pub port: u16,
	pub rtt_ms: f64,
	pub loss_ratio: f64,
	pub weight: u32,
}

impl PathMetrics {
	/// Weight favors low latency and low loss: `max(1, ⌊1000/(rtt+1)·(1−loss)⌋)`.
	pub fn new(ip: IpAddr, port: u16, rtt_ms: f64, loss_ratio: f64) -> Self {
		let score = 1000.0 / (rtt_ms + 1.0) * (1.0 - loss_ratio);
		let weight = (score.floor() as i64).max(1) as u32;

		Self { ip, port, rtt_ms, loss_ratio, weight }
	}

	/// Metrics for a path that has not been measured yet.
	pub fn bootstrap(ip: IpAddr, port: u16) -> Self {
		Self::new(ip, port, BOOTSTRAP_RTT_MS, 0.0)
	}
}

/// Weighted random path selection over a cumulative-weight table.
pub struct PathScheduler {
	paths: Vec<PathMetrics>,
	cumulative_weights: Vec<u64>,
	total_weight: u64,
	rng: StdRng,
}

impl PathScheduler {
	pub fn new(paths: Vec<PathMetrics>) -> Self {
		Self::with_rng(paths, StdRng::from_entropy())
	}

	pub fn with_rng(paths: Vec<PathMetrics>, rng: StdRng) -> Self {
		let mut scheduler = Self {
			paths,
			cumulative_weights: Vec::new(),
			total_weight: 0,
			rng,
		};
		scheduler.build_weight_table();

		scheduler
	}

	/// Replace the path set and rebuild the weight table.
	pub fn update(&mut self, paths: Vec<PathMetrics>) {
		self.paths = paths;
		self.build_weight_table();
	}

	pub fn paths(&self) -> &[PathMetrics] {
		&self.paths
	}

	/// Draw a path with probability proportional to its weight.
	pub fn select(&mut self) -> Result<&PathMetrics, SchedulerError> {
		if self.paths.is_empty() {
			return Err(SchedulerError::NoPaths);
		}

		let draw = self.rng.gen_range(1..=self.total_weight);
		let index = self
			.cumulative_weights
			.iter()
			.position(|&cumulative| cumulative >= draw)
			.unwrap_or(self.paths.len() - 1);

		Ok(&self.paths[index])
	}

	fn build_weight_table(&mut self) {
		self.cumulative_weights.clear();
		self.total_weight = 0;
		for path in &self.paths {
			self.total_weight += u64::from(path.weight);
			self.cumulative_weights.push(self.total_weight);
		}

		tracing::trace!("Rebuilt path weight table, total weight {}.", self.total_weight);
	}
}
