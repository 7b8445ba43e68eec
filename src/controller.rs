use std::collections::VecDeque;

/// Latency target the controller steers towards.
pub const TARGET_LATENCY_MS: f64 = 100.0;

/// Loss rate above which the controller steps down.
pub const MAX_LOSS: f64 = 0.05;

/// Discrete bitrates the controller moves between, in bits per second.
pub const BITRATE_TIERS: [u32; 4] = [600_000, 1_000_000, 1_800_000, 3_000_000];

/// Lower bound on the throughput cap, keeps the encoder target sane when the
/// network collapses entirely.
pub const MIN_BITRATE: u32 = 100_000;

/// Samples retained, one per second.
const WINDOW: usize = 10;

/// One second of measured network conditions.
#[derive(Clone, Copy, Debug)]
pub struct NetworkSample {
	pub throughput_kbps: f64,
	/// None until the first round trip completes.
	pub rtt_ms: Option<f64>,
	pub loss: f64,
}

/// New encoder settings produced by a controller tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
	pub bitrate: u32,
	pub fps: u32,
}

/// Frame rate matching a bitrate tier.
pub fn fps_for_bitrate(bitrate: u32) -> u32 {
	if bitrate <= 1_000_000 {
		20
	} else if bitrate <= 1_800_000 {
		25
	} else {
		30
	}
}

/// Windowed bitrate/FPS ladder over throughput, latency and loss averages.
///
/// Purely advisory: the sender applies the returned decision to the encoder
/// and its pacing, the controller itself never blocks.
pub struct AdaptiveController {
	window: VecDeque<NetworkSample>,
	bitrate: u32,
	fps: u32,
}

impl AdaptiveController {
	pub fn new(initial_bitrate: u32, initial_fps: u32) -> Self {
		Self {
			window: VecDeque::with_capacity(WINDOW),
			bitrate: initial_bitrate,
			fps: initial_fps,
		}
	}

	pub fn bitrate(&self) -> u32 {
		self.bitrate
	}

	pub fn fps(&self) -> u32 {
		self.fps
	}

	/// Feed one second of measurements. Returns the new settings when the
	/// ladder moved.
	pub fn push_sample(&mut self, sample: NetworkSample) -> Option<RateDecision> {
		self.window.push_back(sample);
		if self.window.len() > WINDOW {
			self.window.pop_front();
		}

		let avg_throughput_bps = 1000.0 * self.window.iter().map(|s| s.throughput_kbps).sum::<f64>()
			/ self.window.len() as f64;
		let avg_loss = self.window.iter().map(|s| s.loss).sum::<f64>() / self.window.len() as f64;
		let rtt_samples: Vec<f64> = self.window.iter().filter_map(|s| s.rtt_ms).collect();
		let avg_rtt = if rtt_samples.is_empty() {
			None
		} else {
			Some(rtt_samples.iter().sum::<f64>() / rtt_samples.len() as f64)
		};

		let mut target = self.bitrate;
		let congested =
			avg_rtt.is_some_and(|rtt| rtt > 1.5 * TARGET_LATENCY_MS) || avg_loss > MAX_LOSS;
		let healthy = avg_rtt.is_some_and(|rtt| rtt < 0.8 * TARGET_LATENCY_MS)
			&& avg_loss < 0.5 * MAX_LOSS
			&& avg_throughput_bps > 1.5 * f64::from(self.bitrate);

		if congested {
			target = tier_below(target);
		} else if healthy {
			target = tier_above(target);
		}

		// Never target more than 80% of what the network demonstrably carried.
		if avg_throughput_bps > 0.0 {
			let cap = ((0.8 * avg_throughput_bps) as u32).max(MIN_BITRATE);
			target = target.min(cap);
		}

		if target == self.bitrate {
			return None;
		}

		self.bitrate = target;
		self.fps = fps_for_bitrate(target);
		tracing::debug!("Rate ladder moved to {} bps at {} fps.", self.bitrate, self.fps);

		Some(RateDecision { bitrate: self.bitrate, fps: self.fps })
	}
}

/// Largest tier strictly below `bitrate`, or the lowest tier.
fn tier_below(bitrate: u32) -> u32 {
	BITRATE_TIERS
		.iter()
		.rev()
		.find(|&&tier| tier < bitrate)
		.copied()
		.unwrap_or(BITRATE_TIERS[0])
}

/// Smallest tier strictly above `bitrate`, or `bitrate` itself at the top.
fn tier_above(bitrate: u32) -> u32 {
	BITRATE_TIERS
		.iter()
		.find(|&&tier| tier > bitrate)
		.copied()
		.unwrap_or(bitrate)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample(throughput_kbps: f64, rtt_ms: f64, loss: f64) -> NetworkSample {
		NetworkSample { throughput_kbps, rtt_ms: Some(rtt_ms), loss }
	}

	#[test]
	fn fps_ladder() {
		assert_eq!(fps_for_bitrate(600_000), 20);
		assert_eq!(fps_for_bitrate(1_000_000), 20);
		assert_eq!(fps_for_bitrate(1_800_000), 25);
		assert_eq!(fps_for_bitrate(3_000_000), 30);
	}

	#[test]
	fn high_rtt_steps_down() {
		let mut controller = AdaptiveController::new(1_800_000, 25);
		let decision = controller.push_sample(sample(2000.0, 180.0, 0.0)).unwrap();
		assert_eq!(decision, RateDecision { bitrate: 1_000_000, fps: 20 });
	}

	#[test]
	fn high_loss_steps_down() {
		let mut controller = AdaptiveController::new(1_000_000, 20);
		let decision = controller.push_sample(sample(2000.0, 50.0, 0.10)).unwrap();
		assert_eq!(decision, RateDecision { bitrate: 600_000, fps: 20 });
	}

	#[test]
	fn lowest_tier_holds_under_congestion() {
		let mut controller = AdaptiveController::new(600_000, 20);
		assert_eq!(controller.push_sample(sample(2000.0, 200.0, 0.2)), None);
		assert_eq!(controller.bitrate(), 600_000);
	}

	#[test]
	fn good_conditions_step_up() {
		let mut controller = AdaptiveController::new(1_000_000, 20);
		// Plenty of throughput, low latency, no loss.
		let decision = controller.push_sample(sample(4000.0, 40.0, 0.0)).unwrap();
		assert_eq!(decision, RateDecision { bitrate: 1_800_000, fps: 25 });
	}

	#[test]
	fn step_up_requires_throughput_headroom() {
		let mut controller = AdaptiveController::new(1_000_000, 20);
		// 1.4 Mbps measured is below the 1.5x requirement.
		assert_eq!(controller.push_sample(sample(1400.0, 40.0, 0.0)), None);
	}

	#[test]
	fn throughput_caps_the_target() {
		let mut controller = AdaptiveController::new(3_000_000, 30);
		// Tolerable latency, but only ~1.25 Mbps of demonstrated throughput.
		let decision = controller.push_sample(sample(1250.0, 90.0, 0.0)).unwrap();
		assert_eq!(decision.bitrate, 1_000_000);
	}

	#[test]
	fn idle_window_does_not_move_the_ladder() {
		let mut controller = AdaptiveController::new(1_000_000, 20);
		assert_eq!(
			controller.push_sample(NetworkSample { throughput_kbps: 0.0, rtt_ms: None, loss: 0.0 }),
			None,
		);
		assert_eq!(controller.bitrate(), 1_000_000);
	}

	#[test]
	fn window_is_bounded() {
		let mut controller = AdaptiveController::new(600_000, 20);
		// Ten congested seconds followed by twelve perfect ones; the old
		// samples age out and the controller climbs again.
		for _ in 0..10 {
			controller.push_sample(sample(500.0, 300.0, 0.1));
		}
		let mut climbed = false;
		for _ in 0..12 {
			if controller.push_sample(sample(8000.0, 20.0, 0.0)).is_some() {
				climbed = true;
			}
		}
		assert!(climbed);
		assert!(controller.bitrate() > 600_000);
	}
}
