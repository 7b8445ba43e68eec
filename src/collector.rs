use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
	time::Duration,
};

use async_shutdown::ShutdownManager;
use bytes::Bytes;
use tokio::{sync::mpsc, time::Instant};

use crate::{
	fec::{FecCodec, FecError},
	packet::ChunkPacket,
};

/// Idle time after which a frame with enough chunks is decoded early.
pub const JITTER_TIMEOUT: Duration = Duration::from_millis(50);

/// Hard ceiling on frame age, measured from the first chunk.
pub const MAX_FRAME_AGE: Duration = Duration::from_millis(200);

/// Wake cadence of the background flusher.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Buffered frame count beyond which the oldest frames are evicted.
const MAX_BUFFERED_FRAMES: usize = 100;
const RETAINED_FRAMES: usize = 50;

/// A frame recovered from its chunks, ready for the decoder. Frames come out
/// in no particular order; `frame_id` is the consumer's ordering handle.
#[derive(Debug)]
pub struct CollectedFrame {
	pub frame_id: u16,
	pub data: Vec<u8>,
}

struct PartialFrame {
	chunks: Vec<Option<Bytes>>,
	received_count: usize,
	block_size: usize,
	arrival_time: Instant,
	last_update: Instant,
	/// Set once the frame was delivered or given up on. The entry stays
	/// around as a tombstone until it ages out, so that straggling duplicates
	/// (mirrored paths deliver every chunk more than once) cannot resurrect
	/// the frame and deliver it twice.
	spent: bool,
}

impl PartialFrame {
	fn new(total_chunks: u8, block_size: usize, now: Instant) -> Self {
		Self {
			chunks: vec![None; total_chunks as usize],
			received_count: 0,
			block_size,
			arrival_time: now,
			last_update: now,
			spent: false,
		}
	}

	fn mark_spent(&mut self) {
		self.spent = true;
		self.chunks = Vec::new();
	}
}

enum DecodeOutcome {
	/// Frame recovered and young enough to hand to the decoder.
	Delivered(CollectedFrame),
	/// Frame is spent: delivered too late, undecodable or malformed.
	Discard,
	/// Not recoverable yet, leave it in the buffer.
	Keep,
}

struct CollectorShared {
	frames: Mutex<HashMap<u16, PartialFrame>>,
	fec: FecCodec,
	frame_tx: mpsc::Sender<CollectedFrame>,
}

/// Reassembles chunks into frames, triggering FEC decoding as soon as enough
/// chunks arrived and aging incomplete frames out.
///
/// Chunks arrive in arbitrary order across the paths; slot-addressed storage
/// makes reassembly commutative. A background task flushes expired frames
/// every `FLUSH_INTERVAL`.
pub struct FrameCollector {
	shared: Arc<CollectorShared>,
}

impl FrameCollector {
	pub fn new(
		fec: FecCodec,
		frame_tx: mpsc::Sender<CollectedFrame>,
		stop_signal: ShutdownManager<()>,
	) -> Self {
		let shared = Arc::new(CollectorShared { frames: Mutex::new(HashMap::new()), fec, frame_tx });

		tokio::spawn({
			let shared = shared.clone();
			async move {
				while stop_signal.wrap_cancel(tokio::time::sleep(FLUSH_INTERVAL)).await.is_ok() {
					Self::flush_expired_frames(&shared);
				}
				tracing::debug!("Frame collector flusher stopped.");
			}
		});

		Self { shared }
	}

	/// Feed one received chunk. Complete frames are decoded immediately and
	/// delivered on the frame channel.
	pub fn handle(&self, packet: ChunkPacket) {
		if packet.total_chunks == 0 || packet.chunk_id >= packet.total_chunks {
			tracing::trace!(
				"Rejected chunk {}/{} of frame {}.",
				packet.chunk_id,
				packet.total_chunks,
				packet.frame_id,
			);
			return;
		}

		let now = Instant::now();
		let ready = {
			let mut frames = self.shared.frames.lock().unwrap();
			let frame = frames
				.entry(packet.frame_id)
				.or_insert_with(|| PartialFrame::new(packet.total_chunks, packet.payload.len(), now));

			// Stragglers for a frame that already left the collector.
			if frame.spent {
				return;
			}

			// All chunks of a frame share one geometry; disagreeing chunks are
			// stray traffic.
			if frame.chunks.len() != packet.total_chunks as usize
				|| frame.block_size != packet.payload.len()
			{
				tracing::debug!("Dropping chunk with mismatched geometry for frame {}.", packet.frame_id);
				return;
			}

			let slot = &mut frame.chunks[packet.chunk_id as usize];
			if slot.is_some() {
				return;
			}
			*slot = Some(packet.payload);
			frame.received_count += 1;
			frame.last_update = now;

			if frame.received_count < self.shared.fec.data_shards() {
				return;
			}

			let outcome = Self::try_decode(&self.shared, packet.frame_id, frame, now);
			match outcome {
				DecodeOutcome::Keep => None,
				DecodeOutcome::Discard => {
					frame.mark_spent();
					None
				},
				DecodeOutcome::Delivered(ready) => {
					frame.mark_spent();
					Some(ready)
				},
			}
		};

		if let Some(frame) = ready {
			Self::deliver(&self.shared, frame);
		}
	}

	/// Number of frames currently buffered.
	pub fn buffered_frames(&self) -> usize {
		self.shared.frames.lock().unwrap().len()
	}

	fn flush_expired_frames(shared: &Arc<CollectorShared>) {
		let now = Instant::now();
		let mut decoded = Vec::new();
		{
			let mut frames = shared.frames.lock().unwrap();

			frames.retain(|frame_id, frame| {
				if now.duration_since(frame.arrival_time) > MAX_FRAME_AGE {
					tracing::debug!(
						"Dropping expired frame {frame_id} ({}/{} chunks).",
						frame.received_count,
						frame.chunks.len(),
					);
					false
				} else {
					true
				}
			});

			let ready_ids: Vec<u16> = frames
				.iter()
				.filter(|(_, frame)| {
					!frame.spent
						&& frame.received_count >= shared.fec.data_shards()
						&& now.duration_since(frame.last_update) > JITTER_TIMEOUT
				})
				.map(|(&frame_id, _)| frame_id)
				.collect();
			for frame_id in ready_ids {
				let outcome = Self::try_decode(shared, frame_id, &frames[&frame_id], now);
				match outcome {
					DecodeOutcome::Keep => {},
					DecodeOutcome::Discard => {
						frames.get_mut(&frame_id).unwrap().mark_spent();
					},
					DecodeOutcome::Delivered(ready) => {
						frames.get_mut(&frame_id).unwrap().mark_spent();
						decoded.push(ready);
					},
				}
			}

			if frames.len() > MAX_BUFFERED_FRAMES {
				let mut by_age: Vec<(u16, Instant)> =
					frames.iter().map(|(&frame_id, frame)| (frame_id, frame.arrival_time)).collect();
				by_age.sort_by_key(|&(_, arrival_time)| arrival_time);

				let excess = by_age.len() - RETAINED_FRAMES;
				for (frame_id, _) in by_age.into_iter().take(excess) {
					frames.remove(&frame_id);
				}
				tracing::warn!("Frame buffer overflow, dropped the {excess} oldest frames.");
			}
		}

		for ready in decoded {
			Self::deliver(shared, ready);
		}
	}

	fn try_decode(
		shared: &Arc<CollectorShared>,
		frame_id: u16,
		frame: &PartialFrame,
		now: Instant,
	) -> DecodeOutcome {
		if frame.chunks.len() != shared.fec.total_shards() {
			tracing::debug!(
				"Frame {frame_id} carries {} chunks, expected {}.",
				frame.chunks.len(),
				shared.fec.total_shards(),
			);
			return DecodeOutcome::Discard;
		}

		let blocks = frame
			.chunks
			.iter()
			.map(|chunk| chunk.as_ref().map(|payload| payload.to_vec()))
			.collect();
		match shared.fec.decode(blocks) {
			Ok(data) => {
				let age = now.duration_since(frame.arrival_time);
				if age <= MAX_FRAME_AGE {
					DecodeOutcome::Delivered(CollectedFrame { frame_id, data })
				} else {
					tracing::debug!("Dropping frame {frame_id}, too old at {}ms.", age.as_millis());
					DecodeOutcome::Discard
				}
			},
			// More chunks may still arrive, or the frame ages out.
			Err(FecError::Insufficient { .. }) => DecodeOutcome::Keep,
			Err(e) => {
				tracing::warn!("Failed to decode frame {frame_id}: {e}");
				DecodeOutcome::Discard
			},
		}
	}

	fn deliver(shared: &Arc<CollectorShared>, frame: CollectedFrame) {
		if shared.frame_tx.try_send(frame).is_err() {
			tracing::warn!("Dropping recovered frame, the frame channel is closed or full.");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn chunk(frame_id: u16, chunk_id: u8, total_chunks: u8, payload: &[u8]) -> ChunkPacket {
		ChunkPacket {
			frame_id,
			chunk_id,
			total_chunks,
			timestamp_us: 0,
			payload: Bytes::copy_from_slice(payload),
		}
	}

	/// A (2, 1) collector with its frame channel and shutdown handle.
	fn collector() -> (FrameCollector, mpsc::Receiver<CollectedFrame>, ShutdownManager<()>) {
		let (frame_tx, frame_rx) = mpsc::channel(16);
		let stop_signal = ShutdownManager::new();
		let collector = FrameCollector::new(FecCodec::new(2, 1).unwrap(), frame_tx, stop_signal.clone());

		(collector, frame_rx, stop_signal)
	}

	/// Shards for one frame of `data` under the collector's (2, 1) code.
	fn shards(data: [&[u8; 4]; 2]) -> Vec<Vec<u8>> {
		FecCodec::new(2, 1)
			.unwrap()
			.encode(vec![data[0].to_vec(), data[1].to_vec()])
			.unwrap()
	}

	#[tokio::test(start_paused = true)]
	async fn complete_frame_is_delivered_immediately() {
		let (collector, mut frame_rx, _stop_signal) = collector();

		let shards = shards([&[1, 2, 3, 4], &[5, 6, 7, 8]]);
		collector.handle(chunk(1, 0, 3, &shards[0]));
		collector.handle(chunk(1, 1, 3, &shards[1]));

		let frame = frame_rx.recv().await.unwrap();
		assert_eq!(frame.frame_id, 1);
		assert_eq!(frame.data, [1, 2, 3, 4, 5, 6, 7, 8]);
	}

	#[tokio::test(start_paused = true)]
	async fn mirrored_stragglers_do_not_redeliver() {
		let (collector, mut frame_rx, _stop_signal) = collector();

		// Mirrored paths replay every chunk; the copies trickle in after the
		// frame was already delivered.
		let shards = shards([&[1, 2, 3, 4], &[5, 6, 7, 8]]);
		for _ in 0..2 {
			for chunk_id in 0..3u8 {
				collector.handle(chunk(1, chunk_id, 3, &shards[chunk_id as usize]));
			}
		}

		assert_eq!(frame_rx.recv().await.unwrap().frame_id, 1);
		assert!(frame_rx.try_recv().is_err());

		// The tombstone itself ages out like any other frame.
		tokio::time::sleep(MAX_FRAME_AGE + Duration::from_millis(50)).await;
		assert_eq!(collector.buffered_frames(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn parity_fills_in_for_a_lost_chunk() {
		let (collector, mut frame_rx, _stop_signal) = collector();

		// Data chunk 1 is lost; chunk 0 and the parity chunk arrive.
		let shards = shards([&[1, 2, 3, 4], &[5, 6, 7, 8]]);
		collector.handle(chunk(1, 0, 3, &shards[0]));
		collector.handle(chunk(1, 2, 3, &shards[2]));

		let frame = frame_rx.recv().await.unwrap();
		assert_eq!(frame.data[..4], [1, 2, 3, 4]);
		assert_eq!(frame.data[4..], [5, 6, 7, 8]);
	}

	#[tokio::test(start_paused = true)]
	async fn incomplete_frame_expires_silently() {
		let (collector, mut frame_rx, _stop_signal) = collector();

		collector.handle(chunk(1, 0, 3, &[1, 2, 3, 4]));
		assert_eq!(collector.buffered_frames(), 1);

		tokio::time::sleep(MAX_FRAME_AGE + Duration::from_millis(50)).await;
		assert_eq!(collector.buffered_frames(), 0);
		assert!(frame_rx.try_recv().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn duplicates_are_dropped() {
		let (collector, mut frame_rx, _stop_signal) = collector();

		let shards = shards([&[1, 2, 3, 4], &[5, 6, 7, 8]]);
		collector.handle(chunk(1, 0, 3, &shards[0]));
		collector.handle(chunk(1, 0, 3, &shards[0]));
		assert_eq!(collector.buffered_frames(), 1);

		collector.handle(chunk(1, 1, 3, &shards[1]));
		assert!(frame_rx.recv().await.is_some());
	}

	#[tokio::test(start_paused = true)]
	async fn invalid_ids_are_rejected() {
		let (collector, _frame_rx, _stop_signal) = collector();

		collector.handle(chunk(1, 0, 0, &[1, 2, 3, 4]));
		collector.handle(chunk(1, 3, 3, &[1, 2, 3, 4]));
		collector.handle(chunk(1, 200, 3, &[1, 2, 3, 4]));
		assert_eq!(collector.buffered_frames(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn mismatched_block_size_is_dropped() {
		let (collector, _frame_rx, _stop_signal) = collector();

		collector.handle(chunk(1, 0, 3, &[1, 2, 3, 4]));
		collector.handle(chunk(1, 1, 3, &[1, 2, 3]));
		assert_eq!(collector.buffered_frames(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn buffer_overflow_keeps_the_newest_frames() {
		let (collector, _frame_rx, _stop_signal) = collector();

		// 101 incomplete frames, one chunk each.
		for frame_id in 0..=100u16 {
			collector.handle(chunk(frame_id, 0, 3, &[0, 0, 0, 0]));
		}
		assert_eq!(collector.buffered_frames(), 101);

		// The next flush tick enforces the memory guard.
		tokio::time::sleep(FLUSH_INTERVAL * 2).await;
		assert_eq!(collector.buffered_frames(), RETAINED_FRAMES);
	}

	#[tokio::test(start_paused = true)]
	async fn foreign_geometry_is_discarded() {
		let (collector, mut frame_rx, _stop_signal) = collector();

		// A 4-chunk frame cannot belong to the (2, 1) code.
		collector.handle(chunk(7, 0, 4, &[1, 2, 3, 4]));
		collector.handle(chunk(7, 1, 4, &[5, 6, 7, 8]));

		assert!(frame_rx.try_recv().is_err());
		collector.handle(chunk(7, 2, 4, &[9, 10, 11, 12]));
		assert!(frame_rx.try_recv().is_err());
	}
}
