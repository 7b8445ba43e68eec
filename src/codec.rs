/// A raw BGR frame, as produced by capture and consumed by the display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoFrame {
	pub width: u32,
	pub height: u32,
	/// Packed BGR24 pixels, `width * height * 3` bytes.
	pub data: Vec<u8>,
}

/// Produces frames at the capture cadence.
pub trait FrameSource: Send {
	/// The next frame, or None when no frame is ready yet.
	fn capture(&mut self) -> Option<VideoFrame>;
}

/// Compresses frames into an elementary bitstream.
pub trait VideoEncoder: Send {
	/// Encode one frame. An empty result means the encoder buffered the
	/// frame and will flush it later.
	fn encode(&mut self, frame: &VideoFrame) -> Vec<u8>;

	fn set_bitrate(&mut self, bitrate: u32);

	fn bitrate(&self) -> u32;
}

/// Decompresses a received bitstream back into frames.
pub trait VideoDecoder: Send {
	fn decode(&mut self, data: &[u8]) -> Option<VideoFrame>;
}

/// Consumes decoded frames, typically a rendering surface.
pub trait FrameSink: Send {
	fn present(&mut self, frame_id: u16, frame: VideoFrame);
}
