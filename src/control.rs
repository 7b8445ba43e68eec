use thiserror::Error;

/// Tag distinguishing control datagrams from chunk data on the shared ports.
pub const CONTROL_MAGIC: u32 = 0x434D_5431;

/// Magic plus message type.
const CONTROL_HEADER_SIZE: usize = 6;

#[derive(Debug, Error)]
pub enum ControlError {
	#[error("control message of {0} bytes is truncated")]
	Truncated(usize),
	#[error("unknown control message type {0:#06x}")]
	UnknownType(u16),
}

#[repr(u16)]
enum ControlMessageType {
	Ping = 0x0001,
	Pong = 0x0002,
	LossStats = 0x0003,
}

impl TryFrom<u16> for ControlMessageType {
	type Error = ();

	fn try_from(v: u16) -> Result<Self, Self::Error> {
		match v {
			x if x == Self::Ping as u16 => Ok(Self::Ping),
			x if x == Self::Pong as u16 => Ok(Self::Pong),
			x if x == Self::LossStats as u16 => Ok(Self::LossStats),
			_ => Err(()),
		}
	}
}

/// Out-of-band signaling carried over the data paths.
///
/// Pings probe each path once a second and come back as pongs with the
/// original timestamp, feeding the RTT monitor. The receiver reports its
/// cumulative per-port receipt counters so the sender can account loss
/// without a per-chunk ack path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
	Ping { port: u16, timestamp_us: i64 },
	Pong { port: u16, timestamp_us: i64 },
	LossStats { received: Vec<(u16, u64)> },
}

impl ControlMessage {
	/// Cheap check whether a datagram carries the control magic.
	pub fn is_control(buffer: &[u8]) -> bool {
		buffer.len() >= 4 && buffer[..4] == CONTROL_MAGIC.to_le_bytes()
	}

	pub fn serialize(&self) -> Vec<u8> {
		let mut buffer = Vec::with_capacity(CONTROL_HEADER_SIZE + 10);
		buffer.extend(CONTROL_MAGIC.to_le_bytes());

		match self {
			Self::Ping { port, timestamp_us } => {
				buffer.extend((ControlMessageType::Ping as u16).to_le_bytes());
				buffer.extend(port.to_le_bytes());
				buffer.extend(timestamp_us.to_le_bytes());
			},
			Self::Pong { port, timestamp_us } => {
				buffer.extend((ControlMessageType::Pong as u16).to_le_bytes());
				buffer.extend(port.to_le_bytes());
				buffer.extend(timestamp_us.to_le_bytes());
			},
			Self::LossStats { received } => {
				buffer.extend((ControlMessageType::LossStats as u16).to_le_bytes());
				buffer.extend((received.len() as u16).to_le_bytes());
				for (port, count) in received {
					buffer.extend(port.to_le_bytes());
					buffer.extend(count.to_le_bytes());
				}
			},
		}

		buffer
	}

	pub fn parse(buffer: &[u8]) -> Result<Self, ControlError> {
		if buffer.len() < CONTROL_HEADER_SIZE {
			return Err(ControlError::Truncated(buffer.len()));
		}

		let message_type = u16::from_le_bytes(buffer[4..6].try_into().unwrap());
		let body = &buffer[CONTROL_HEADER_SIZE..];
		match message_type
			.try_into()
			.map_err(|()| ControlError::UnknownType(message_type))?
		{
			ControlMessageType::Ping => {
				let (port, timestamp_us) = parse_probe(body, buffer.len())?;
				Ok(Self::Ping { port, timestamp_us })
			},
			ControlMessageType::Pong => {
				let (port, timestamp_us) = parse_probe(body, buffer.len())?;
				Ok(Self::Pong { port, timestamp_us })
			},
			ControlMessageType::LossStats => {
				if body.len() < 2 {
					return Err(ControlError::Truncated(buffer.len()));
				}
				let count = u16::from_le_bytes(body[..2].try_into().unwrap()) as usize;
				let entries = &body[2..];
				if entries.len() < count * 10 {
					return Err(ControlError::Truncated(buffer.len()));
				}

				let received = (0..count)
					.map(|index| {
						let entry = &entries[index * 10..(index + 1) * 10];
						(
							u16::from_le_bytes(entry[..2].try_into().unwrap()),
							u64::from_le_bytes(entry[2..].try_into().unwrap()),
						)
					})
					.collect();
				Ok(Self::LossStats { received })
			},
		}
	}
}

fn parse_probe(body: &[u8], total_len: usize) -> Result<(u16, i64), ControlError> {
	if body.len() < 10 {
		return Err(ControlError::Truncated(total_len));
	}

	Ok((
		u16::from_le_bytes(body[..2].try_into().unwrap()),
		i64::from_le_bytes(body[2..10].try_into().unwrap()),
	))
}
