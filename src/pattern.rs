//! Synthetic stand-ins for the capture/codec/display collaborators, so the
//! transport can be exercised end-to-end without a camera or an H.264
//! library wired in.

use crate::codec::{FrameSink, FrameSource, VideoDecoder, VideoEncoder, VideoFrame};

/// Generates a moving BGR gradient. Keep the tile small enough that one frame
/// fits the FEC block budget (`k * chunk_size` bytes) of the transport.
pub struct PatternSource {
	width: u32,
	height: u32,
	counter: u64,
}

impl PatternSource {
	pub fn new(width: u32, height: u32) -> Self {
		Self { width, height, counter: 0 }
	}
}

impl FrameSource for PatternSource {
	fn capture(&mut self) -> Option<VideoFrame> {
		let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
		for y in 0..self.height {
			for x in 0..self.width {
				data.push((x + y + self.counter as u32 * 3) as u8);
				data.push((128 + y + self.counter as u32 * 2) as u8);
				data.push((64 + x + self.counter as u32 * 5) as u8);
			}
		}
		self.counter += 1;

		Some(VideoFrame { width: self.width, height: self.height, data })
	}
}

/// Emits the raw frame bytes as the "bitstream". Tracks the requested
/// bitrate so the adaptive controller has something to steer.
pub struct PassthroughEncoder {
	bitrate: u32,
}

impl PassthroughEncoder {
	pub fn new(bitrate: u32) -> Self {
		Self { bitrate }
	}
}

impl VideoEncoder for PassthroughEncoder {
	fn encode(&mut self, frame: &VideoFrame) -> Vec<u8> {
		frame.data.clone()
	}

	fn set_bitrate(&mut self, bitrate: u32) {
		tracing::debug!("Encoder bitrate set to {bitrate} bps.");
		self.bitrate = bitrate;
	}

	fn bitrate(&self) -> u32 {
		self.bitrate
	}
}

/// Reverses [`PassthroughEncoder`] for a known frame geometry. Trailing
/// zeros from FEC block padding are cut off.
pub struct PassthroughDecoder {
	width: u32,
	height: u32,
}

impl PassthroughDecoder {
	pub fn new(width: u32, height: u32) -> Self {
		Self { width, height }
	}
}

impl VideoDecoder for PassthroughDecoder {
	fn decode(&mut self, data: &[u8]) -> Option<VideoFrame> {
		let frame_size = (self.width * self.height * 3) as usize;
		if data.len() < frame_size {
			tracing::warn!("Discarding truncated frame of {} bytes.", data.len());
			return None;
		}

		Some(VideoFrame {
			width: self.width,
			height: self.height,
			data: data[..frame_size].to_vec(),
		})
	}
}

/// Logs delivered frames instead of rendering them.
#[derive(Default)]
pub struct TraceSink {
	frames: u64,
}

impl TraceSink {
	pub fn new() -> Self {
		Self::default()
	}
}

impl FrameSink for TraceSink {
	fn present(&mut self, frame_id: u16, frame: VideoFrame) {
		self.frames += 1;
		tracing::info!(
			"Presented frame {frame_id} ({}x{}, {} total).",
			frame.width,
			frame.height,
			self.frames,
		);
	}
}
