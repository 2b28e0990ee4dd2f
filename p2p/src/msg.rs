// Copyright 2020 The Bitnode Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Message types and the 24-byte envelope that frames every message on the
//! wire: network magic, ASCII command, payload length and a double SHA-256
//! checksum over the payload.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use bitnode_core::core::hash::{sha256d, Hash};
use bitnode_core::core::{Block, BlockHeader, Transaction};
use bitnode_core::global;
use bitnode_core::ser::{
	self, read_bytes, read_varint, write_bytes, write_varint, Readable, Writeable,
};

use crate::types::{Error, ServiceFlags};

/// Largest payload we will read, matching the reference client's cap.
pub const MAX_MSG_LEN: u64 = 4_000_000;

/// Inventory type for a transaction announcement
pub const INV_TX: u32 = 1;
/// Inventory type for a block announcement
pub const INV_BLOCK: u32 = 2;

/// One inventory entry of an inv or getdata message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
	/// Entry type, INV_TX or INV_BLOCK
	pub inv_type: u32,
	/// Hash of the announced object
	pub hash: Hash,
}

impl Writeable for Inventory {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32::<LittleEndian>(self.inv_type)?;
		self.hash.write(writer)?;
		Ok(())
	}
}

impl Readable for Inventory {
	fn read<R: Read>(reader: &mut R) -> Result<Inventory, ser::Error> {
		Ok(Inventory {
			inv_type: reader.read_u32::<LittleEndian>()?,
			hash: Hash::read(reader)?,
		})
	}
}

/// The version message opening a handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionMsg {
	/// Protocol version the peer speaks
	pub version: u32,
	/// Services the peer advertises
	pub services: ServiceFlags,
	/// Peer clock, seconds since the epoch
	pub timestamp: i64,
	/// Random nonce for self-connection detection
	pub nonce: u64,
	/// Free-form client identifier
	pub user_agent: String,
	/// Height of the peer's candidate chain
	pub start_height: i32,
}

impl Writeable for VersionMsg {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32::<LittleEndian>(self.version)?;
		writer.write_u64::<LittleEndian>(self.services.bits())?;
		writer.write_i64::<LittleEndian>(self.timestamp)?;
		// two legacy 26-byte network address fields, carried but unused
		write_net_addr(writer, self.services.bits())?;
		write_net_addr(writer, self.services.bits())?;
		writer.write_u64::<LittleEndian>(self.nonce)?;
		write_bytes(writer, self.user_agent.as_bytes())?;
		writer.write_i32::<LittleEndian>(self.start_height)?;
		// relay flag
		writer.write_u8(1)?;
		Ok(())
	}
}

impl Readable for VersionMsg {
	fn read<R: Read>(reader: &mut R) -> Result<VersionMsg, ser::Error> {
		let version = reader.read_u32::<LittleEndian>()?;
		let services = reader.read_u64::<LittleEndian>()?;
		let timestamp = reader.read_i64::<LittleEndian>()?;
		read_net_addr(reader)?;
		read_net_addr(reader)?;
		let nonce = reader.read_u64::<LittleEndian>()?;
		let user_agent = String::from_utf8(read_bytes(reader)?)
			.map_err(|_| ser::Error::CorruptedData)?;
		let start_height = reader.read_i32::<LittleEndian>()?;
		// trailing relay flag is optional for old peers
		let _ = reader.read_u8();
		Ok(VersionMsg {
			version,
			services: ServiceFlags::from_bits_truncate(services),
			timestamp,
			nonce,
			user_agent,
			start_height,
		})
	}
}

fn write_net_addr<W: Write>(writer: &mut W, services: u64) -> Result<(), ser::Error> {
	writer.write_u64::<LittleEndian>(services)?;
	writer.write_all(&[0u8; 16])?;
	writer.write_u16::<BigEndian>(0)?;
	Ok(())
}

fn read_net_addr<R: Read>(reader: &mut R) -> Result<(), ser::Error> {
	let mut buf = [0u8; 26];
	reader.read_exact(&mut buf)?;
	Ok(())
}

/// A getheaders request: locator hashes (most recent first) plus a stop
/// hash, zero meaning "as many as you have".
#[derive(Debug, Clone, PartialEq)]
pub struct GetHeadersMsg {
	/// Protocol version, as the reference encoding requires
	pub version: u32,
	/// Block locator, most recent first
	pub locator: Vec<Hash>,
	/// Hash to stop at, zero for no stop
	pub stop: Hash,
}

impl Writeable for GetHeadersMsg {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32::<LittleEndian>(self.version)?;
		write_varint(writer, self.locator.len() as u64)?;
		for hash in &self.locator {
			hash.write(writer)?;
		}
		self.stop.write(writer)?;
		Ok(())
	}
}

impl Readable for GetHeadersMsg {
	fn read<R: Read>(reader: &mut R) -> Result<GetHeadersMsg, ser::Error> {
		let version = reader.read_u32::<LittleEndian>()?;
		let count = read_varint(reader)?;
		if count > 2000 {
			return Err(ser::Error::TooLargeReadErr(count));
		}
		let mut locator = Vec::with_capacity(count as usize);
		for _ in 0..count {
			locator.push(Hash::read(reader)?);
		}
		Ok(GetHeadersMsg {
			version,
			locator,
			stop: Hash::read(reader)?,
		})
	}
}

/// All messages the node speaks. Unknown commands are surfaced so callers
/// can ignore them without dropping the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
	/// Handshake opener
	Version(VersionMsg),
	/// Handshake acknowledgement
	Verack,
	/// Keepalive request
	Ping(u64),
	/// Keepalive response
	Pong(u64),
	/// Request for headers following a locator
	GetHeaders(GetHeadersMsg),
	/// Headers response
	Headers(Vec<BlockHeader>),
	/// Object announcement
	Inv(Vec<Inventory>),
	/// Object request
	GetData(Vec<Inventory>),
	/// A full block
	Block(Block),
	/// A transaction
	Tx(Transaction),
	/// Anything we don't understand, with its command name
	Unknown(String),
}

impl Message {
	fn command(&self) -> &'static str {
		match self {
			Message::Version(_) => "version",
			Message::Verack => "verack",
			Message::Ping(_) => "ping",
			Message::Pong(_) => "pong",
			Message::GetHeaders(_) => "getheaders",
			Message::Headers(_) => "headers",
			Message::Inv(_) => "inv",
			Message::GetData(_) => "getdata",
			Message::Block(_) => "block",
			Message::Tx(_) => "tx",
			Message::Unknown(_) => "unknown",
		}
	}

	fn payload(&self) -> Result<Vec<u8>, ser::Error> {
		let mut buf = vec![];
		match self {
			Message::Version(v) => v.write(&mut buf)?,
			Message::Verack | Message::Unknown(_) => (),
			Message::Ping(n) | Message::Pong(n) => buf.write_u64::<LittleEndian>(*n)?,
			Message::GetHeaders(g) => g.write(&mut buf)?,
			Message::Headers(headers) => {
				write_varint(&mut buf, headers.len() as u64)?;
				for header in headers {
					header.write(&mut buf)?;
					// per-header transaction count, always zero in a
					// headers message
					write_varint(&mut buf, 0)?;
				}
			}
			Message::Inv(invs) | Message::GetData(invs) => {
				write_varint(&mut buf, invs.len() as u64)?;
				for inv in invs {
					inv.write(&mut buf)?;
				}
			}
			Message::Block(b) => b.write(&mut buf)?,
			Message::Tx(tx) => tx.write(&mut buf)?,
		}
		Ok(buf)
	}
}

fn command_bytes(cmd: &str) -> [u8; 12] {
	let mut bytes = [0u8; 12];
	bytes[..cmd.len()].copy_from_slice(cmd.as_bytes());
	bytes
}

/// Writes one framed message to the stream.
pub fn write_message<W: Write>(stream: &mut W, msg: &Message) -> Result<usize, Error> {
	let payload = msg.payload()?;
	let checksum = sha256d(&payload);
	let mut envelope = Vec::with_capacity(24 + payload.len());
	envelope.extend_from_slice(&global::magic());
	envelope.extend_from_slice(&command_bytes(msg.command()));
	envelope.write_u32::<LittleEndian>(payload.len() as u32)?;
	envelope.extend_from_slice(&checksum.to_slice()[..4]);
	envelope.extend_from_slice(&payload);
	stream.write_all(&envelope)?;
	Ok(envelope.len())
}

/// Reads one framed message from the stream, blocking until a full message
/// arrived. Returns the message and its total size on the wire.
pub fn read_message<R: Read>(stream: &mut R) -> Result<(Message, usize), Error> {
	let mut magic = [0u8; 4];
	stream.read_exact(&mut magic)?;
	if magic != global::magic() {
		return Err(Error::BadMagic);
	}
	let mut command = [0u8; 12];
	stream.read_exact(&mut command)?;
	let len = stream.read_u32::<LittleEndian>()? as u64;
	if len > MAX_MSG_LEN {
		return Err(Error::MessageTooLarge(len));
	}
	let mut checksum = [0u8; 4];
	stream.read_exact(&mut checksum)?;

	let mut payload = vec![0u8; len as usize];
	stream.read_exact(&mut payload)?;
	if sha256d(&payload).to_slice()[..4] != checksum[..] {
		return Err(Error::BadChecksum);
	}

	let cmd = command
		.iter()
		.take_while(|b| **b != 0)
		.map(|b| *b as char)
		.collect::<String>();

	let reader = &mut &payload[..];
	let msg = match cmd.as_str() {
		"version" => Message::Version(VersionMsg::read(reader)?),
		"verack" => Message::Verack,
		"ping" => Message::Ping(reader.read_u64::<LittleEndian>().map_err(ser::Error::from)?),
		"pong" => Message::Pong(reader.read_u64::<LittleEndian>().map_err(ser::Error::from)?),
		"getheaders" => Message::GetHeaders(GetHeadersMsg::read(reader)?),
		"headers" => {
			let count = read_varint(reader).map_err(Error::Serialization)?;
			if count > 2000 {
				return Err(Error::MessageTooLarge(count));
			}
			let mut headers = Vec::with_capacity(count as usize);
			for _ in 0..count {
				headers.push(BlockHeader::read(reader)?);
				let _ = read_varint(reader)?;
			}
			Message::Headers(headers)
		}
		"inv" => Message::Inv(read_inv_list(reader)?),
		"getdata" => Message::GetData(read_inv_list(reader)?),
		"block" => Message::Block(Block::read(reader)?),
		"tx" => Message::Tx(Transaction::read(reader)?),
		other => Message::Unknown(other.to_owned()),
	};
	Ok((msg, 24 + len as usize))
}

fn read_inv_list(reader: &mut &[u8]) -> Result<Vec<Inventory>, Error> {
	let count = read_varint(reader).map_err(Error::Serialization)?;
	if count > 50_000 {
		return Err(Error::MessageTooLarge(count));
	}
	let mut invs = Vec::with_capacity(count as usize);
	for _ in 0..count {
		invs.push(Inventory::read(reader)?);
	}
	Ok(invs)
}

#[cfg(test)]
mod tests {
	use super::*;
	use bitnode_core::genesis;

	fn round_trip(msg: Message) {
		let mut buf = vec![];
		write_message(&mut buf, &msg).unwrap();
		let (out, size) = read_message(&mut &buf[..]).unwrap();
		assert_eq!(out, msg);
		assert_eq!(size, buf.len());
	}

	#[test]
	fn frame_round_trips() {
		round_trip(Message::Verack);
		round_trip(Message::Ping(7));
		round_trip(Message::Pong(7));
		round_trip(Message::Version(VersionMsg {
			version: global::PROTOCOL_VERSION,
			services: ServiceFlags::default(),
			timestamp: 1231006505,
			nonce: 99,
			user_agent: global::USER_AGENT.to_owned(),
			start_height: 0,
		}));
		let gen = genesis::genesis_main();
		round_trip(Message::Headers(vec![gen.header.clone()]));
		round_trip(Message::Block(gen.clone()));
		round_trip(Message::Tx(gen.txs[0].clone()));
		round_trip(Message::GetData(vec![Inventory {
			inv_type: INV_BLOCK,
			hash: gen.hash(),
		}]));
	}

	#[test]
	fn corrupted_checksum_detected() {
		let mut buf = vec![];
		write_message(&mut buf, &Message::Ping(1)).unwrap();
		let last = buf.len() - 1;
		buf[last] ^= 0xff;
		match read_message(&mut &buf[..]) {
			Err(Error::BadChecksum) => (),
			other => panic!("expected BadChecksum, got {:?}", other),
		}
	}

	#[test]
	fn wrong_magic_detected() {
		let mut buf = vec![];
		write_message(&mut buf, &Message::Ping(1)).unwrap();
		buf[0] ^= 0xff;
		match read_message(&mut &buf[..]) {
			Err(Error::BadMagic) => (),
			other => panic!("expected BadMagic, got {:?}", other),
		}
	}

	#[test]
	fn unknown_command_tolerated() {
		// hand-build a frame with an unknown command and empty payload
		let mut buf = vec![];
		buf.extend_from_slice(&global::magic());
		let mut command = [0u8; 12];
		command[..8].copy_from_slice(b"sendaddr");
		buf.extend_from_slice(&command);
		buf.extend_from_slice(&0u32.to_le_bytes());
		buf.extend_from_slice(&sha256d(&[]).to_slice()[..4]);
		let (msg, _) = read_message(&mut &buf[..]).unwrap();
		assert_eq!(msg, Message::Unknown("sendaddr".to_owned()));
	}
}
