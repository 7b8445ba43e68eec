use std::time::{Duration, Instant};

use async_shutdown::ShutdownManager;
use bytes::Bytes;

use crate::{
	codec::{FrameSource, VideoEncoder},
	config::{Config, DispatchMode},
	control::ControlMessage,
	controller::AdaptiveController,
	fec::FecCodec,
	loss::LossTracker,
	packet::{ChunkPacket, MAX_DATAGRAM_SIZE},
	rtt::RttMonitor,
	scheduler::{PathMetrics, PathScheduler},
	slicer::slice_frame,
	transport::UdpTransport,
};
use super::now_us;

/// Cadence of the control tick: adaptive rate decision, path metric refresh,
/// ping probes and throughput accounting.
const CONTROL_INTERVAL: Duration = Duration::from_secs(1);

/// Capture → encode → slice → FEC → dispatch, with a 1 Hz control loop
/// feeding measured network conditions back into the encoder.
pub struct SenderPipeline {
	config: Config,
	transport: UdpTransport,
	rtt: RttMonitor,
	loss: LossTracker,
	scheduler: PathScheduler,
	controller: AdaptiveController,
	fec: FecCodec,
	source: Box<dyn FrameSource>,
	encoder: Box<dyn VideoEncoder>,
	fps: u32,
	frame_id: u16,
	bytes_sent: usize,
	epoch: Instant,
}

impl SenderPipeline {
	#[allow(clippy::result_unit_err)]
	pub async fn new(
		config: Config,
		source: Box<dyn FrameSource>,
		encoder: Box<dyn VideoEncoder>,
	) -> Result<Self, ()> {
		config.validate()?;

		let mut transport = UdpTransport::bind(&config.transport.local_ports)
			.map_err(|e| tracing::error!("Failed to initialize transport: {e}"))?;
		transport.set_targets(config.transport.remote_address, &config.transport.remote_ports);

		// Until the first pongs arrive every path is assumed equally usable.
		let bootstrap = config
			.transport
			.remote_ports
			.iter()
			.map(|&port| PathMetrics::bootstrap(config.transport.remote_address, port))
			.collect();
		let scheduler = PathScheduler::new(bootstrap);

		let fec = FecCodec::new(config.fec.data_shards, config.fec.parity_shards)
			.map_err(|e| tracing::error!("Failed to initialize FEC codec: {e}"))?;

		let controller = AdaptiveController::new(config.video.bitrate, config.video.fps);
		let fps = config.video.fps;

		Ok(Self {
			config,
			transport,
			rtt: RttMonitor::new(),
			loss: LossTracker::new(),
			scheduler,
			controller,
			fec,
			source,
			encoder,
			fps,
			frame_id: 0,
			bytes_sent: 0,
			epoch: Instant::now(),
		})
	}

	pub async fn run(mut self, stop_signal: ShutdownManager<()>) -> Result<(), ()> {
		tracing::info!(
			"Streaming to {} over ports {:?}.",
			self.config.transport.remote_address,
			self.config.transport.remote_ports,
		);

		let mut last_control_tick = Instant::now();
		while !stop_signal.is_shutdown_triggered() {
			let frame_start = Instant::now();

			self.poll_feedback();

			if let Some(frame) = self.source.capture() {
				let encoded = self.encoder.encode(&frame);
				if !encoded.is_empty() {
					self.dispatch_frame(encoded.into()).await;
				}
			}

			if last_control_tick.elapsed() >= CONTROL_INTERVAL {
				self.control_tick(last_control_tick.elapsed()).await;
				last_control_tick = Instant::now();
			}

			// Align the loop with the frame duration.
			let frame_duration = Duration::from_millis(u64::from(1000 / self.fps.max(1)));
			let elapsed = frame_start.elapsed();
			if elapsed < frame_duration {
				tokio::time::sleep(frame_duration - elapsed).await;
			}
		}

		tracing::info!("Sender pipeline stopped.");
		Ok(())
	}

	/// Slice, pad, FEC-expand and dispatch one encoded frame.
	async fn dispatch_frame(&mut self, encoded: Bytes) {
		let chunk_size = self.config.transport.chunk_size;
		let data_shards = self.fec.data_shards();
		let slices = slice_frame(encoded, chunk_size);
		if slices.len() > data_shards {
			tracing::warn!(
				"Frame {} needs {} chunks but the FEC geometry carries {}, truncating.",
				self.frame_id,
				slices.len(),
				data_shards,
			);
		}

		// Equalize the block set: short slices grow to the full chunk size,
		// missing blocks are all zeros. The decoder tolerates the zero tail.
		let mut blocks: Vec<Vec<u8>> = slices
			.into_iter()
			.take(data_shards)
			.map(|slice| {
				let mut block = slice.to_vec();
				block.resize(chunk_size, 0);
				block
			})
			.collect();
		blocks.resize(data_shards, vec![0u8; chunk_size]);

		let shards = match self.fec.encode(blocks) {
			Ok(shards) => shards,
			Err(e) => {
				tracing::error!("Failed to FEC-encode frame {}: {e}", self.frame_id);
				return;
			},
		};

		let frame_id = self.frame_id;
		self.frame_id = self.frame_id.wrapping_add(1);
		let total_chunks = shards.len() as u8;
		let timestamp_us = now_us(self.epoch);

		for (chunk_id, shard) in shards.into_iter().enumerate() {
			let packet = ChunkPacket {
				frame_id,
				chunk_id: chunk_id as u8,
				total_chunks,
				timestamp_us,
				payload: shard.into(),
			};
			self.dispatch_chunk(&packet).await;
		}
	}

	async fn dispatch_chunk(&mut self, packet: &ChunkPacket) {
		let ip = self.config.transport.remote_address;
		match self.config.transport.dispatch {
			DispatchMode::Mirror => {
				let ports = &self.config.transport.remote_ports;
				self.bytes_sent += self.transport.send_multipath(ip, ports, packet).await;
				for &port in ports {
					self.loss.packet_sent(port);
				}
			},
			DispatchMode::Weighted => {
				// Validated non-empty path set, selection cannot fail.
				let Ok(path) = self.scheduler.select() else { return };
				let port = path.port;
				match self.transport.send_one(ip, port, packet).await {
					Ok(sent) => self.bytes_sent += sent,
					Err(e) => tracing::warn!("Failed to send chunk to {ip}:{port}: {e}"),
				}
				self.loss.packet_sent(port);
			},
		}
	}

	/// Once per second: fold measurements into the controller, refresh the
	/// scheduler weights and probe every path.
	async fn control_tick(&mut self, interval: Duration) {
		let throughput_kbps = self.bytes_sent as f64 * 8.0 / 1000.0 / interval.as_secs_f64();
		self.bytes_sent = 0;

		let sample = crate::controller::NetworkSample {
			throughput_kbps,
			rtt_ms: self.rtt.average_rtt(),
			loss: self.loss.loss_rate(),
		};
		if let Some(decision) = self.controller.push_sample(sample) {
			tracing::info!(
				"Adapting to network conditions: {} bps at {} fps.",
				decision.bitrate,
				decision.fps,
			);
			self.encoder.set_bitrate(decision.bitrate);
			self.fps = decision.fps;
		}

		let ip = self.config.transport.remote_address;
		let paths = self
			.config
			.transport
			.remote_ports
			.iter()
			.map(|&port| match self.rtt.mean_rtt(port) {
				Some(rtt_ms) => PathMetrics::new(ip, port, rtt_ms, self.loss.port_loss_rate(port)),
				None => PathMetrics::bootstrap(ip, port),
			})
			.collect();
		self.scheduler.update(paths);

		for &port in &self.config.transport.remote_ports {
			let timestamp_us = now_us(self.epoch);
			self.rtt.start_ping(port, timestamp_us);
			let ping = ControlMessage::Ping { port, timestamp_us };
			if let Err(e) = self.transport.send_raw(ip, port, &ping.serialize()).await {
				tracing::debug!("Failed to ping {ip}:{port}: {e}");
			}
		}

		tracing::debug!(
			"Throughput {throughput_kbps:.0} kbps, rtt {:?} ms, loss {:.3}.",
			sample.rtt_ms,
			sample.loss,
		);
	}

	/// Drain pongs and loss summaries from every socket.
	fn poll_feedback(&mut self) {
		let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
		for bound in self.transport.sockets() {
			loop {
				let len = match bound.socket.try_recv_from(&mut buffer) {
					Ok((len, _)) => len,
					Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
					Err(e) => {
						tracing::warn!("Failed to receive on port {}: {e}", bound.port);
						break;
					},
				};

				if !ControlMessage::is_control(&buffer[..len]) {
					tracing::trace!("Ignoring unexpected datagram of {len} bytes.");
					continue;
				}

				match ControlMessage::parse(&buffer[..len]) {
					Ok(ControlMessage::Pong { port, .. }) => {
						self.rtt.record_pong(port, now_us(self.epoch));
					},
					Ok(ControlMessage::LossStats { received }) => {
						for (port, count) in received {
							self.loss.record_receiver_counts(port, count);
						}
					},
					Ok(ControlMessage::Ping { .. }) => {},
					Err(e) => tracing::debug!("Ignoring malformed control message: {e}"),
				}
			}
		}
	}
}
