use std::{
	net::SocketAddr,
	time::{Duration, Instant},
};

use async_shutdown::ShutdownManager;
use tokio::sync::mpsc;

use crate::{
	codec::{FrameSink, VideoDecoder},
	collector::{CollectedFrame, FrameCollector},
	config::Config,
	control::ControlMessage,
	fec::FecCodec,
	loss::LossTracker,
	packet::{ChunkPacket, MAX_DATAGRAM_SIZE},
	transport::UdpTransport,
};
use super::now_us;

/// Cadence of the loss summary reported back to the sender.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(1);

/// Pause when all sockets ran dry, keeps the poll loop off the CPU.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Recv → parse → collect → decode → present, plus the control message
/// duties of the receiving peer: answering pings and reporting receipt
/// counts.
pub struct ReceiverPipeline {
	transport: UdpTransport,
	loss: LossTracker,
	collector: FrameCollector,
	frame_rx: mpsc::Receiver<CollectedFrame>,
	decoder: Box<dyn VideoDecoder>,
	sink: Box<dyn FrameSink>,
	/// Source address of the most recent ping, target of the loss summary.
	peer: Option<SocketAddr>,
	epoch: Instant,
}

impl ReceiverPipeline {
	#[allow(clippy::result_unit_err)]
	pub async fn new(
		config: Config,
		decoder: Box<dyn VideoDecoder>,
		sink: Box<dyn FrameSink>,
		stop_signal: ShutdownManager<()>,
	) -> Result<Self, ()> {
		config.validate()?;

		let transport = UdpTransport::bind(&config.transport.local_ports)
			.map_err(|e| tracing::error!("Failed to initialize transport: {e}"))?;

		let fec = FecCodec::new(config.fec.data_shards, config.fec.parity_shards)
			.map_err(|e| tracing::error!("Failed to initialize FEC codec: {e}"))?;

		let (frame_tx, frame_rx) = mpsc::channel(64);
		let collector = FrameCollector::new(fec, frame_tx, stop_signal);

		Ok(Self {
			transport,
			loss: LossTracker::new(),
			collector,
			frame_rx,
			decoder,
			sink,
			peer: None,
			epoch: Instant::now(),
		})
	}

	/// Ports the transport actually bound, for handing to a sender.
	pub fn local_ports(&self) -> Vec<u16> {
		self.transport.local_ports()
	}

	pub async fn run(mut self, stop_signal: ShutdownManager<()>) -> Result<(), ()> {
		tracing::info!("Listening for chunks on ports {:?}.", self.local_ports());

		let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
		let mut last_summary = Instant::now();
		while !stop_signal.is_shutdown_triggered() {
			let mut received_any = false;
			for index in 0..self.transport.sockets().len() {
				loop {
					let bound = &self.transport.sockets()[index];
					let (len, source) = match bound.socket.try_recv_from(&mut buffer) {
						Ok(received) => received,
						Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
						Err(e) => {
							tracing::warn!("Failed to receive on port {}: {e}", bound.port);
							break;
						},
					};

					received_any = true;
					let port = bound.port;
					self.handle_datagram(port, &buffer[..len], source).await;
				}
			}

			while let Ok(frame) = self.frame_rx.try_recv() {
				if let Some(video) = self.decoder.decode(&frame.data) {
					self.sink.present(frame.frame_id, video);
				}
			}

			if last_summary.elapsed() >= SUMMARY_INTERVAL {
				self.send_loss_summary().await;
				last_summary = Instant::now();
			}

			if !received_any {
				tokio::time::sleep(IDLE_SLEEP).await;
			}
		}

		tracing::info!("Receiver pipeline stopped.");
		Ok(())
	}

	async fn handle_datagram(&mut self, local_port: u16, datagram: &[u8], source: SocketAddr) {
		if ControlMessage::is_control(datagram) {
			match ControlMessage::parse(datagram) {
				Ok(ControlMessage::Ping { port, timestamp_us }) => {
					self.peer = Some(source);
					let pong = ControlMessage::Pong { port, timestamp_us };
					if let Err(e) = self
						.transport
						.send_raw(source.ip(), source.port(), &pong.serialize())
						.await
					{
						tracing::debug!("Failed to answer ping from {source}: {e}");
					}
				},
				Ok(other) => tracing::trace!("Skipped control message: {other:?}"),
				Err(e) => tracing::debug!("Ignoring malformed control message: {e}"),
			}
			return;
		}

		match ChunkPacket::parse(datagram) {
			Ok(packet) => {
				self.loss.packet_received(local_port);
				if packet.chunk_id == 0 {
					// One-way delay signal; the clocks are not synchronized,
					// only the trend is meaningful.
					tracing::trace!(
						"Frame {} first chunk, one-way delta {} us.",
						packet.frame_id,
						now_us(self.epoch) - packet.timestamp_us,
					);
				}
				self.collector.handle(packet);
			},
			Err(e) => {
				tracing::debug!("Dropping malformed datagram on port {local_port}: {e}");
			},
		}
	}

	/// Report cumulative receipt counts to the peer that pinged us last.
	async fn send_loss_summary(&mut self) {
		let Some(peer) = self.peer else { return };

		let received = self.loss.received_counts();
		if received.is_empty() {
			return;
		}

		let message = ControlMessage::LossStats { received };
		if let Err(e) = self
			.transport
			.send_raw(peer.ip(), peer.port(), &message.serialize())
			.await
		{
			tracing::debug!("Failed to send loss summary to {peer}: {e}");
		}
	}
}
