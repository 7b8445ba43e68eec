use std::{collections::HashMap, sync::Mutex};

#[derive(Clone, Copy, Default)]
struct PortCounters {
	sent: u64,
	received: u64,
}

/// Per-port send/receive counters and loss rates.
///
/// The sender counts transmissions locally; receipt counts arrive out of band
/// through the receiver's periodic loss summary and are folded in with
/// `record_receiver_counts`. On the receiver the same tracker counts incoming
/// chunks per local port.
#[derive(Default)]
pub struct LossTracker {
	counters: Mutex<HashMap<u16, PortCounters>>,
}

impl LossTracker {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn packet_sent(&self, port: u16) {
		let mut counters = self.counters.lock().unwrap();
		counters.entry(port).or_default().sent += 1;
	}

	pub fn packet_received(&self, port: u16) {
		let mut counters = self.counters.lock().unwrap();
		counters.entry(port).or_default().received += 1;
	}

	/// Fold a cumulative receipt count reported by the remote peer. Reports
	/// may arrive out of order, the counter never goes backwards.
	pub fn record_receiver_counts(&self, port: u16, received: u64) {
		let mut counters = self.counters.lock().unwrap();
		let entry = counters.entry(port).or_default();
		entry.received = entry.received.max(received);
	}

	/// Aggregate loss rate over all ports, 0 when nothing was sent.
	pub fn loss_rate(&self) -> f64 {
		let counters = self.counters.lock().unwrap();
		let sent: u64 = counters.values().map(|c| c.sent).sum();
		let received: u64 = counters.values().map(|c| c.received).sum();
		if sent == 0 {
			return 0.0;
		}

		(1.0 - received as f64 / sent as f64).max(0.0)
	}

	pub fn port_loss_rate(&self, port: u16) -> f64 {
		let counters = self.counters.lock().unwrap();
		match counters.get(&port) {
			Some(c) if c.sent > 0 => (1.0 - c.received as f64 / c.sent as f64).max(0.0),
			_ => 0.0,
		}
	}

	/// Ports whose loss rate exceeds `threshold`.
	pub fn high_loss_ports(&self, threshold: f64) -> Vec<u16> {
		let counters = self.counters.lock().unwrap();
		let mut ports: Vec<u16> = counters
			.iter()
			.filter(|(_, c)| c.sent > 0 && 1.0 - c.received as f64 / c.sent as f64 > threshold)
			.map(|(&port, _)| port)
			.collect();
		ports.sort_unstable();

		ports
	}

	/// Cumulative receipt count per port, the payload of the loss summary.
	pub fn received_counts(&self) -> Vec<(u16, u64)> {
		let counters = self.counters.lock().unwrap();
		let mut counts: Vec<(u16, u64)> = counters
			.iter()
			.filter(|(_, c)| c.received > 0)
			.map(|(&port, c)| (port, c.received))
			.collect();
		counts.sort_unstable();

		counts
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_traffic_means_no_loss() {
		let tracker = LossTracker::new();
		assert_eq!(tracker.loss_rate(), 0.0);
		assert_eq!(tracker.port_loss_rate(5000), 0.0);
	}

	#[test]
	fn aggregate_loss_spans_ports() {
		let tracker = LossTracker::new();
		for _ in 0..10 {
			tracker.packet_sent(5000);
			tracker.packet_sent(5001);
		}
		tracker.record_receiver_counts(5000, 10);
		tracker.record_receiver_counts(5001, 5);

		assert_eq!(tracker.loss_rate(), 0.25);
		assert_eq!(tracker.port_loss_rate(5000), 0.0);
		assert_eq!(tracker.port_loss_rate(5001), 0.5);
	}

	#[test]
	fn stale_summary_does_not_regress() {
		let tracker = LossTracker::new();
		for _ in 0..4 {
			tracker.packet_sent(5000);
		}
		tracker.record_receiver_counts(5000, 3);
		tracker.record_receiver_counts(5000, 2);

		assert_eq!(tracker.port_loss_rate(5000), 0.25);
	}

	#[test]
	fn high_loss_ports_are_filtered() {
		let tracker = LossTracker::new();
		for _ in 0..10 {
			tracker.packet_sent(5000);
			tracker.packet_sent(5001);
			tracker.packet_sent(5002);
		}
		tracker.record_receiver_counts(5000, 10);
		tracker.record_receiver_counts(5001, 4);
		tracker.record_receiver_counts(5002, 1);

		assert_eq!(tracker.high_loss_ports(0.5), vec![5001, 5002]);
		assert_eq!(tracker.high_loss_ports(0.7), vec![5002]);
	}

	#[test]
	fn receiver_counts_round_trip() {
		let tracker = LossTracker::new();
		tracker.packet_received(5000);
		tracker.packet_received(5000);
		tracker.packet_received(5001);

		assert_eq!(tracker.received_counts(), vec![(5000, 2), (5001, 1)]);
	}
}
