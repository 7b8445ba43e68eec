use bytes::Bytes;
use thiserror::Error;

/// Size of the chunk header on the wire.
pub const HEADER_SIZE: usize = 12;

/// Largest datagram the transport will emit or accept.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

#[derive(Debug, Error)]
pub enum PacketError {
	#[error("datagram of {0} bytes is shorter than the {HEADER_SIZE} byte header")]
	Malformed(usize),
}

/// One data or parity chunk of an encoded video frame.
///
/// All chunks of a frame share the same `frame_id`, `total_chunks` and payload
/// size. `chunk_id` indexes into the k+r blocks produced by the erasure coder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPacket {
	pub frame_id: u16,
	pub chunk_id: u8,
	pub total_chunks: u8,
	pub timestamp_us: i64,
	pub payload: Bytes,
}

impl ChunkPacket {
	/// Wire layout, little-endian:
	///
	/// ```text
	/// offset  size  field
	/// 0       2     frame_id
	/// 2       1     chunk_id
	/// 3       1     total_chunks
	/// 4       8     timestamp_us
	/// 12      var   payload
	/// ```
	pub fn serialize(&self) -> Vec<u8> {
		let mut buffer = Vec::with_capacity(HEADER_SIZE + self.payload.len());
		buffer.extend(self.frame_id.to_le_bytes());
		buffer.extend(self.chunk_id.to_le_bytes());
		buffer.extend(self.total_chunks.to_le_bytes());
		buffer.extend(self.timestamp_us.to_le_bytes());
		buffer.extend_from_slice(&self.payload);
		buffer
	}

	/// Parse a datagram. Only the header length is validated here, the
	/// collector enforces the chunk id invariants.
	pub fn parse(buffer: &[u8]) -> Result<Self, PacketError> {
		if buffer.len() < HEADER_SIZE {
			return Err(PacketError::Malformed(buffer.len()));
		}

		Ok(Self {
			frame_id: u16::from_le_bytes(buffer[0..2].try_into().unwrap()),
			chunk_id: buffer[2],
			total_chunks: buffer[3],
			timestamp_us: i64::from_le_bytes(buffer[4..12].try_into().unwrap()),
			payload: Bytes::copy_from_slice(&buffer[HEADER_SIZE..]),
		})
	}
}
