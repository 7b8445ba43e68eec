use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
};

/// Number of samples retained per port.
pub const MAX_HISTORY: usize = 10;

#[derive(Default)]
struct RttState {
	/// Send timestamps of pings still waiting for their echo.
	outstanding: HashMap<u16, i64>,
	/// Most recent round-trip time per port.
	rtt_ms: HashMap<u16, f64>,
	history: HashMap<u16, VecDeque<f64>>,
}

/// Per-path round-trip time tracking with a bounded sample history.
#[derive(Default)]
pub struct RttMonitor {
	state: Mutex<RttState>,
}

impl RttMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record the send timestamp of a ping towards `port`.
	pub fn start_ping(&self, port: u16, timestamp_us: i64) {
		let mut state = self.state.lock().unwrap();
		state.outstanding.insert(port, timestamp_us);
	}

	/// Record the echo for an outstanding ping. `timestamp_us` is the receive
	/// time on the same clock that produced the send timestamp.
	pub fn record_pong(&self, port: u16, timestamp_us: i64) {
		let mut state = self.state.lock().unwrap();
		let Some(sent) = state.outstanding.remove(&port) else {
			tracing::trace!("Ignoring pong for port {port} without an outstanding ping.");
			return;
		};

		let rtt_ms = (timestamp_us - sent) as f64 / 1000.0;
		let history = state.history.entry(port).or_default();
		history.push_back(rtt_ms);
		if history.len() > MAX_HISTORY {
			history.pop_front();
		}
		state.rtt_ms.insert(port, rtt_ms);
	}

	/// Most recent round-trip time for a port, if any sample arrived yet.
	pub fn rtt(&self, port: u16) -> Option<f64> {
		self.state.lock().unwrap().rtt_ms.get(&port).copied()
	}

	/// Mean over the retained history of a port.
	pub fn mean_rtt(&self, port: u16) -> Option<f64> {
		let state = self.state.lock().unwrap();
		let history = state.history.get(&port)?;
		if history.is_empty() {
			return None;
		}

		Some(history.iter().sum::<f64>() / history.len() as f64)
	}

	/// Arithmetic mean of the latest sample across all ports with at least
	/// one sample.
	pub fn average_rtt(&self) -> Option<f64> {
		let state = self.state.lock().unwrap();
		if state.rtt_ms.is_empty() {
			return None;
		}

		Some(state.rtt_ms.values().sum::<f64>() / state.rtt_ms.len() as f64)
	}

	/// Ports ordered by ascending round-trip time.
	pub fn sorted_ports(&self) -> Vec<u16> {
		let state = self.state.lock().unwrap();
		let mut pairs: Vec<(u16, f64)> = state.rtt_ms.iter().map(|(&port, &rtt)| (port, rtt)).collect();
		pairs.sort_by(|a, b| a.1.total_cmp(&b.1));

		pairs.into_iter().map(|(port, _)| port).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pong_produces_a_sample() {
		let monitor = RttMonitor::new();
		monitor.start_ping(5000, 1_000_000);
		monitor.record_pong(5000, 1_012_500);

		assert_eq!(monitor.rtt(5000), Some(12.5));
		assert_eq!(monitor.average_rtt(), Some(12.5));
	}

	#[test]
	fn pong_without_ping_is_ignored() {
		let monitor = RttMonitor::new();
		monitor.record_pong(5000, 1_000_000);
		assert_eq!(monitor.rtt(5000), None);
	}

	#[test]
	fn history_is_bounded() {
		let monitor = RttMonitor::new();
		for i in 0..20i64 {
			monitor.start_ping(5000, i * 1_000_000);
			monitor.record_pong(5000, i * 1_000_000 + (i + 1) * 1000);
		}

		// Only the last ten samples (11ms..20ms) remain.
		assert_eq!(monitor.mean_rtt(5000), Some(15.5));
		assert_eq!(monitor.rtt(5000), Some(20.0));
	}

	#[test]
	fn average_spans_ports() {
		let monitor = RttMonitor::new();
		monitor.start_ping(5000, 0);
		monitor.record_pong(5000, 10_000);
		monitor.start_ping(5001, 0);
		monitor.record_pong(5001, 30_000);

		assert_eq!(monitor.average_rtt(), Some(20.0));
	}

	#[test]
	fn ports_sort_by_rtt() {
		let monitor = RttMonitor::new();
		for (port, rtt_us) in [(5000u16, 30_000i64), (5001, 10_000), (5002, 20_000)] {
			monitor.start_ping(port, 0);
			monitor.record_pong(port, rtt_us);
		}

		assert_eq!(monitor.sorted_ports(), vec![5001, 5002, 5000]);
	}

	#[test]
	fn no_samples_means_no_average() {
		assert_eq!(RttMonitor::new().average_rtt(), None);
	}
}
