use std::{
	collections::HashMap,
	io,
	net::{IpAddr, SocketAddr},
	sync::atomic::{AtomicUsize, Ordering},
	time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::ChunkPacket;

/// Send buffer hint requested on every socket.
pub const SEND_BUFFER_SIZE: usize = 64 * 1024;

const SEND_ATTEMPTS: usize = 3;
const SEND_RETRY_DELAY: Duration = Duration::from_micros(100);

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("failed to bind UDP socket on port {port}: {source}")]
	Bind { port: u16, source: io::Error },
	#[error("send to port {port} still blocked after {SEND_ATTEMPTS} attempts")]
	Backpressure { port: u16 },
	#[error("failed to send to port {port}: {source}")]
	Send { port: u16, source: io::Error },
}

/// A socket together with the local port it was bound to.
pub struct BoundSocket {
	pub socket: UdpSocket,
	pub port: u16,
}

/// Non-blocking multi-socket UDP transport.
///
/// One socket per configured local port; sends round-robin over the sockets
/// and fan out over the remote ports. The socket list is immutable after
/// `bind`, only the round-robin cursor mutates during sends.
pub struct UdpTransport {
	sockets: Vec<BoundSocket>,
	targets: HashMap<(IpAddr, u16), SocketAddr>,
	next_socket: AtomicUsize,
}

impl UdpTransport {
	/// Bind one non-blocking socket per local port on the wildcard address.
	/// Must be called from within a tokio runtime.
	pub fn bind(local_ports: &[u16]) -> Result<Self, TransportError> {
		let mut sockets = Vec::with_capacity(local_ports.len());
		for &port in local_ports {
			let socket = bind_socket(port).map_err(|source| TransportError::Bind { port, source })?;
			let port = socket
				.local_addr()
				.map_err(|source| TransportError::Bind { port, source })?
				.port();
			sockets.push(BoundSocket { socket, port });
			tracing::debug!("Bound UDP socket on port {port}.");
		}

		Ok(Self {
			sockets,
			targets: HashMap::new(),
			next_socket: AtomicUsize::new(0),
		})
	}

	/// Precompute the socket addresses for a set of destination ports.
	pub fn set_targets(&mut self, ip: IpAddr, ports: &[u16]) {
		for &port in ports {
			self.targets.insert((ip, port), SocketAddr::new(ip, port));
		}
	}

	pub fn sockets(&self) -> &[BoundSocket] {
		&self.sockets
	}

	pub fn local_ports(&self) -> Vec<u16> {
		self.sockets.iter().map(|bound| bound.port).collect()
	}

	/// Serialize a chunk and send it on one path.
	pub async fn send_one(
		&self,
		ip: IpAddr,
		port: u16,
		packet: &ChunkPacket,
	) -> Result<usize, TransportError> {
		self.send_raw(ip, port, &packet.serialize()).await
	}

	/// Send a chunk on every path for redundancy. Partial failures are logged
	/// and skipped; the sum of successfully sent bytes is returned.
	pub async fn send_multipath(&self, ip: IpAddr, ports: &[u16], packet: &ChunkPacket) -> usize {
		let datagram = packet.serialize();
		let mut total = 0;
		for &port in ports {
			match self.send_raw(ip, port, &datagram).await {
				Ok(sent) => total += sent,
				Err(e) => tracing::warn!("Failed to send chunk to {ip}:{port}: {e}"),
			}
		}

		total
	}

	/// Send a raw datagram, round-robining over the bound sockets. A full
	/// socket buffer is retried a few times before the packet is given up on.
	pub async fn send_raw(&self, ip: IpAddr, port: u16, datagram: &[u8]) -> Result<usize, TransportError> {
		let index = self.next_socket.fetch_add(1, Ordering::Relaxed) % self.sockets.len();
		let socket = &self.sockets[index].socket;
		let target = self.target(ip, port);

		for _ in 0..SEND_ATTEMPTS {
			match socket.try_send_to(datagram, target) {
				Ok(sent) => return Ok(sent),
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
					tokio::time::sleep(SEND_RETRY_DELAY).await;
				},
				Err(source) => return Err(TransportError::Send { port, source }),
			}
		}

		Err(TransportError::Backpressure { port })
	}

	fn target(&self, ip: IpAddr, port: u16) -> SocketAddr {
		self.targets
			.get(&(ip, port))
			.copied()
			.unwrap_or_else(|| SocketAddr::new(ip, port))
	}
}

fn bind_socket(port: u16) -> io::Result<UdpSocket> {
	let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
	socket.set_reuse_address(true)?;
	socket.set_send_buffer_size(SEND_BUFFER_SIZE)?;
	socket.set_nonblocking(true)?;

	let address = SocketAddr::from(([0, 0, 0, 0], port));
	socket.bind(&address.into())?;

	UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
	use std::net::Ipv4Addr;

	use bytes::Bytes;

	use super::*;

	fn test_packet() -> ChunkPacket {
		ChunkPacket {
			frame_id: 42,
			chunk_id: 1,
			total_chunks: 3,
			timestamp_us: 99,
			payload: Bytes::from_static(&[1, 2, 3, 4]),
		}
	}

	#[tokio::test]
	async fn send_one_reaches_a_bound_socket() {
		let receiver = UdpTransport::bind(&[0]).unwrap();
		let port = receiver.local_ports()[0];

		let mut sender = UdpTransport::bind(&[0]).unwrap();
		sender.set_targets(IpAddr::V4(Ipv4Addr::LOCALHOST), &[port]);

		let packet = test_packet();
		let sent = sender
			.send_one(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &packet)
			.await
			.unwrap();
		assert_eq!(sent, packet.serialize().len());

		let mut buffer = [0u8; 1500];
		let (len, _) = tokio::time::timeout(
			Duration::from_secs(1),
			receiver.sockets()[0].socket.recv_from(&mut buffer),
		)
		.await
		.unwrap()
		.unwrap();
		assert_eq!(ChunkPacket::parse(&buffer[..len]).unwrap(), packet);
	}

	#[tokio::test]
	async fn send_multipath_reaches_every_port() {
		let receiver = UdpTransport::bind(&[0, 0]).unwrap();
		let ports = receiver.local_ports();

		let mut sender = UdpTransport::bind(&[0, 0]).unwrap();
		sender.set_targets(IpAddr::V4(Ipv4Addr::LOCALHOST), &ports);

		let packet = test_packet();
		let total = sender
			.send_multipath(IpAddr::V4(Ipv4Addr::LOCALHOST), &ports, &packet)
			.await;
		assert_eq!(total, 2 * packet.serialize().len());

		for bound in receiver.sockets() {
			let mut buffer = [0u8; 1500];
			let (len, _) = tokio::time::timeout(Duration::from_secs(1), bound.socket.recv_from(&mut buffer))
				.await
				.unwrap()
				.unwrap();
			assert_eq!(ChunkPacket::parse(&buffer[..len]).unwrap(), packet);
		}
	}
}
