pub use self::{receiver::ReceiverPipeline, sender::SenderPipeline};

mod receiver;
mod sender;

/// Microseconds since the pipeline's epoch on the steady clock. Used for
/// chunk timestamps and ping probes; only differences on the same clock are
/// meaningful.
pub(crate) fn now_us(epoch: std::time::Instant) -> i64 {
	epoch.elapsed().as_micros() as i64
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use async_shutdown::ShutdownManager;

	use crate::{
		codec::{FrameSink, FrameSource, VideoFrame},
		config::{Config, DispatchMode},
		pattern::{PassthroughDecoder, PassthroughEncoder, PatternSource},
	};
	use super::*;

	/// Sink that hands every presented frame to a channel so the test can
	/// inspect it.
	struct ChannelSink {
		frame_tx: tokio::sync::mpsc::UnboundedSender<(u16, VideoFrame)>,
	}

	impl FrameSink for ChannelSink {
		fn present(&mut self, frame_id: u16, frame: VideoFrame) {
			let _ = self.frame_tx.send((frame_id, frame));
		}
	}

	async fn stream_over_loopback(dispatch: DispatchMode) {
		// Two paths on ephemeral ports; the receiver owns the data ports.
		let mut receiver_config = Config::default();
		receiver_config.transport.local_ports = vec![0, 0];
		receiver_config.transport.remote_ports = vec![1];
		receiver_config.video.fps = 100;

		let (frame_tx, mut frame_rx) = tokio::sync::mpsc::unbounded_channel();
		let stop_signal = ShutdownManager::new();

		let receiver = ReceiverPipeline::new(
			receiver_config,
			Box::new(PassthroughDecoder::new(16, 8)),
			Box::new(ChannelSink { frame_tx }),
			stop_signal.clone(),
		)
		.await
		.unwrap();

		let mut sender_config = Config::default();
		sender_config.transport.local_ports = vec![0, 0];
		sender_config.transport.remote_ports = receiver.local_ports();
		sender_config.transport.dispatch = dispatch;
		sender_config.video.fps = 100;

		let sender = SenderPipeline::new(
			sender_config,
			Box::new(PatternSource::new(16, 8)),
			Box::new(PassthroughEncoder::new(1_000_000)),
		)
		.await
		.unwrap();

		let receiver_task = tokio::spawn(receiver.run(stop_signal.clone()));
		let sender_task = tokio::spawn(sender.run(stop_signal.clone()));

		// A 16x8 BGR pattern tile.
		let (frame_id, frame) = tokio::time::timeout(Duration::from_secs(5), frame_rx.recv())
			.await
			.expect("no frame was delivered")
			.unwrap();
		assert_eq!(frame.width, 16);
		assert_eq!(frame.height, 8);
		assert_eq!(frame.data.len(), 16 * 8 * 3);

		let mut expected = PatternSource::new(16, 8);
		for _ in 0..frame_id {
			expected.capture();
		}
		assert_eq!(frame.data, expected.capture().unwrap().data);

		stop_signal.trigger_shutdown(()).ok();
		let _ = sender_task.await;
		let _ = receiver_task.await;
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn frames_survive_the_mirror_path() {
		stream_over_loopback(DispatchMode::Mirror).await;
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn frames_survive_the_weighted_path() {
		stream_over_loopback(DispatchMode::Weighted).await;
	}
}
