use bytes::Bytes;

/// Default slice size in bytes, leaving headroom below the 1500 byte datagram
/// limit for the chunk header and FEC expansion.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Split an encoded frame into contiguous slices of at most `chunk_size`
/// bytes. The final slice carries the remainder without padding; an empty
/// frame produces no slices.
pub fn slice_frame(frame_data: Bytes, chunk_size: usize) -> Vec<Bytes> {
	assert!(chunk_size > 0);

	let total_chunks = frame_data.len().div_ceil(chunk_size);
	let mut chunks = Vec::with_capacity(total_chunks);
	for index in 0..total_chunks {
		let start = index * chunk_size;
		let end = ((index + 1) * chunk_size).min(frame_data.len());
		chunks.push(frame_data.slice(start..end));
	}

	chunks
}
