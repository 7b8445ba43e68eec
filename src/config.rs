use std::{
	net::{IpAddr, Ipv4Addr},
	path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{fec, slicer};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
	/// Configuration for the UDP paths between the peers.
	pub transport: TransportConfig,

	/// Initial encoder parameters.
	pub video: VideoConfig,

	/// Forward error correction parameters.
	pub fec: FecConfig,
}

impl Config {
	#[allow(clippy::result_unit_err)]
	pub fn read_from_file<P: AsRef<Path>>(file: P) -> Result<Config, ()> {
		let config = std::fs::read_to_string(file)
			.map_err(|e| tracing::error!("Failed to open configuration file: {e}"))?;
		let config: Config = toml::from_str(&config)
			.map_err(|e| tracing::error!("Failed to parse configuration file: {e}"))?;

		config.validate()?;
		Ok(config)
	}

	/// Reject configurations the transport cannot express.
	#[allow(clippy::result_unit_err)]
	pub fn validate(&self) -> Result<(), ()> {
		if self.transport.local_ports.is_empty() {
			tracing::error!("At least one local port is required.");
			return Err(());
		}
		if self.transport.remote_ports.is_empty() {
			tracing::error!("At least one remote port is required.");
			return Err(());
		}
		if self.transport.chunk_size == 0 {
			tracing::error!("Chunk size must be positive.");
			return Err(());
		}
		if self.fec.data_shards == 0 || self.fec.parity_shards == 0 {
			tracing::error!("FEC requires at least one data and one parity block.");
			return Err(());
		}
		// total_chunks travels in a single byte.
		if self.fec.data_shards + self.fec.parity_shards > u8::MAX as usize {
			tracing::error!("FEC cannot exceed {} blocks per frame.", u8::MAX);
			return Err(());
		}
		if self.video.fps == 0 {
			tracing::error!("Frame rate must be positive.");
			return Err(());
		}

		Ok(())
	}
}

/// How chunks are spread over the configured paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
	/// Every chunk goes out on every path.
	Mirror,
	/// Each chunk takes one path, drawn by RTT/loss weight.
	Weighted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
	/// Local UDP ports to bind, one socket per port.
	pub local_ports: Vec<u16>,

	/// Address of the remote peer.
	pub remote_address: IpAddr,

	/// UDP ports the remote peer listens on, one path per port.
	pub remote_ports: Vec<u16>,

	/// Chunk dispatch policy.
	pub dispatch: DispatchMode,

	/// Payload bytes per chunk.
	pub chunk_size: usize,
}

impl Default for TransportConfig {
	fn default() -> Self {
		Self {
			local_ports: vec![47100, 47101, 47102, 47103],
			remote_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
			remote_ports: vec![47200, 47201, 47202, 47203],
			dispatch: DispatchMode::Mirror,
			chunk_size: slicer::DEFAULT_CHUNK_SIZE,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VideoConfig {
	pub width: u32,
	pub height: u32,

	/// Initial frame rate; the adaptive controller takes over from there.
	pub fps: u32,

	/// Initial bitrate in bits per second.
	pub bitrate: u32,
}

impl Default for VideoConfig {
	fn default() -> Self {
		Self {
			width: 1280,
			height: 720,
			fps: 30,
			bitrate: 1_000_000,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FecConfig {
	/// Data blocks per frame (k).
	pub data_shards: usize,

	/// Parity blocks per frame (r); any r of the k+r blocks may be lost.
	pub parity_shards: usize,
}

impl Default for FecConfig {
	fn default() -> Self {
		Self {
			data_shards: fec::DEFAULT_DATA_SHARDS,
			parity_shards: fec::DEFAULT_PARITY_SHARDS,
		}
	}
}
