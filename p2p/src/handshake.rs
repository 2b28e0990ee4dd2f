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

//! Version and verack negotiation performed on a fresh socket before the
//! connection threads start. Carries a rolling window of the nonces we
//! sent out so a connection looping back to ourselves is recognized.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpStream};

use chrono::Utc;
use rand::{thread_rng, Rng};

use bitnode_core::global;
use bitnode_util::RwLock;

use crate::msg::{read_message, write_message, Message, VersionMsg};
use crate::types::{Direction, Error, P2PConfig, PeerInfo};

/// Oldest protocol version we still talk to.
pub const PROTOCOL_MINIMUM: u32 = 70001;

const NONCES_CAP: usize = 100;

/// Handshake state shared by every connection attempt.
pub struct Handshake {
	config: P2PConfig,
	nonces: RwLock<VecDeque<u64>>,
}

impl Handshake {
	/// New handshaker for the given network configuration.
	pub fn new(config: P2PConfig) -> Handshake {
		Handshake {
			config,
			nonces: RwLock::new(VecDeque::with_capacity(NONCES_CAP)),
		}
	}

	/// Performs the outgoing side of the handshake: send our version, read
	/// the peer's version, exchange veracks.
	pub fn initiate(
		&self,
		stream: &mut TcpStream,
		addr: SocketAddr,
		direction: Direction,
		height: u64,
	) -> Result<PeerInfo, Error> {
		write_message(stream, &Message::Version(self.our_version(height)))?;

		let theirs = match read_message(stream)? {
			(Message::Version(v), _) => v,
			_ => return Err(Error::BadHandshake),
		};
		self.check_remote(&theirs)?;

		write_message(stream, &Message::Verack)?;
		match read_message(stream)? {
			(Message::Verack, _) => (),
			_ => return Err(Error::BadHandshake),
		}

		Ok(self.peer_info(theirs, addr, direction))
	}

	/// Performs the incoming side of the handshake: read the peer's
	/// version first, answer with ours, exchange veracks.
	pub fn accept(
		&self,
		stream: &mut TcpStream,
		addr: SocketAddr,
		height: u64,
	) -> Result<PeerInfo, Error> {
		let theirs = match read_message(stream)? {
			(Message::Version(v), _) => v,
			_ => return Err(Error::BadHandshake),
		};
		self.check_remote(&theirs)?;

		write_message(stream, &Message::Version(self.our_version(height)))?;
		write_message(stream, &Message::Verack)?;
		match read_message(stream)? {
			(Message::Verack, _) => (),
			_ => return Err(Error::BadHandshake),
		}

		Ok(self.peer_info(theirs, addr, Direction::Inbound))
	}

	fn our_version(&self, height: u64) -> VersionMsg {
		let nonce = thread_rng().gen();
		{
			let mut nonces = self.nonces.write();
			if nonces.len() == NONCES_CAP {
				nonces.pop_front();
			}
			nonces.push_back(nonce);
		}
		VersionMsg {
			version: self.config.protocol_maximum.min(global::PROTOCOL_VERSION),
			services: self.config.services,
			timestamp: Utc::now().timestamp(),
			nonce,
			user_agent: global::USER_AGENT.to_owned(),
			start_height: height as i32,
		}
	}

	fn check_remote(&self, theirs: &VersionMsg) -> Result<(), Error> {
		if self.nonces.read().contains(&theirs.nonce) {
			return Err(Error::PeerWithSelf);
		}
		if theirs.version < PROTOCOL_MINIMUM {
			return Err(Error::ProtocolMismatch {
				us: self.config.protocol_maximum.min(global::PROTOCOL_VERSION),
				peer: theirs.version,
			});
		}
		Ok(())
	}

	fn peer_info(&self, theirs: VersionMsg, addr: SocketAddr, direction: Direction) -> PeerInfo {
		let ours = self.config.protocol_maximum.min(global::PROTOCOL_VERSION);
		PeerInfo {
			services: theirs.services,
			user_agent: theirs.user_agent,
			version: ours.min(theirs.version),
			addr,
			direction,
			height: theirs.start_height.max(0) as u64,
		}
	}
}
