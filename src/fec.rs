use reed_solomon_erasure::{galois_8, ReedSolomon};
use thiserror::Error;

/// Default number of data blocks per frame.
pub const DEFAULT_DATA_SHARDS: usize = 8;

/// Default number of parity blocks per frame.
pub const DEFAULT_PARITY_SHARDS: usize = 4;

#[derive(Debug, Error)]
pub enum FecError {
	#[error("expected {expected} blocks, got {actual}")]
	BlockCount { expected: usize, actual: usize },
	#[error("block {index} has {actual} bytes, expected {expected}")]
	BlockSize { index: usize, expected: usize, actual: usize },
	#[error("received {received} of {total} blocks, need at least {required}")]
	Insufficient { received: usize, required: usize, total: usize },
	#[error("reconstruction failed: {0}")]
	Reconstruct(reed_solomon_erasure::Error),
	#[error("invalid coding parameters: {0}")]
	Parameters(reed_solomon_erasure::Error),
}

/// Systematic Reed-Solomon code over GF(2^8).
///
/// `encode` expands k equally sized data blocks into k+r blocks; `decode`
/// recovers the original data bytes from any k of them.
pub struct FecCodec {
	codec: ReedSolomon<galois_8::Field>,
	data_shards: usize,
	parity_shards: usize,
}

impl FecCodec {
	pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self, FecError> {
		let codec = ReedSolomon::new(data_shards, parity_shards).map_err(FecError::Parameters)?;
		Ok(Self { codec, data_shards, parity_shards })
	}

	pub fn data_shards(&self) -> usize {
		self.data_shards
	}

	pub fn parity_shards(&self) -> usize {
		self.parity_shards
	}

	pub fn total_shards(&self) -> usize {
		self.data_shards + self.parity_shards
	}

	/// Expand exactly k data blocks of equal length into k+r blocks. The
	/// input blocks are returned unchanged in the first k slots, followed by
	/// r parity blocks.
	pub fn encode(&self, blocks: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, FecError> {
		if blocks.len() != self.data_shards {
			return Err(FecError::BlockCount { expected: self.data_shards, actual: blocks.len() });
		}

		let block_size = blocks[0].len();
		for (index, block) in blocks.iter().enumerate() {
			if block.len() != block_size {
				return Err(FecError::BlockSize { index, expected: block_size, actual: block.len() });
			}
		}

		let mut shards = blocks;
		shards.resize(self.total_shards(), vec![0u8; block_size]);
		self.codec.encode(&mut shards).map_err(FecError::Reconstruct)?;

		Ok(shards)
	}

	/// Recover the concatenated k data blocks from any k of the k+r blocks.
	/// Missing blocks are `None`; all present blocks must share one size.
	pub fn decode(&self, mut blocks: Vec<Option<Vec<u8>>>) -> Result<Vec<u8>, FecError> {
		if blocks.len() != self.total_shards() {
			return Err(FecError::BlockCount { expected: self.total_shards(), actual: blocks.len() });
		}

		let received = blocks.iter().filter(|block| block.is_some()).count();
		if received < self.data_shards {
			return Err(FecError::Insufficient {
				received,
				required: self.data_shards,
				total: self.total_shards(),
			});
		}

		// With every data block present there is nothing to reconstruct.
		if blocks[..self.data_shards].iter().any(|block| block.is_none()) {
			self.codec.reconstruct_data(&mut blocks).map_err(FecError::Reconstruct)?;
		}

		let mut data = Vec::new();
		for block in blocks.into_iter().take(self.data_shards) {
			data.extend(block.expect("data blocks are present after reconstruction"));
		}

		Ok(data)
	}
}
