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

//! Shared types of the peer-to-peer layer: configuration, service bits,
//! errors and the traits bridging the network to the rest of the node.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bitnode_core::core::hash::Hash;
use bitnode_core::core::{Block, BlockHeader, Transaction};
use bitnode_core::global;
use bitnode_core::ser;

/// Maximum number of block headers a peer should ever send
pub const MAX_BLOCK_HEADERS: usize = 2000;

/// Maximum number of locator hashes composed for a getheaders request
pub const MAX_LOCATORS: usize = 32;

/// Size in messages of a peer's buffered send channel before sends fail
pub const SEND_CHANNEL_CAP: usize = 10;

/// Errors of the peer-to-peer layer.
#[derive(Debug)]
pub enum Error {
	/// Underlying connection failure
	Connection(io::Error),
	/// Message carried the wrong network magic
	BadMagic,
	/// Message payload did not match its checksum
	BadChecksum,
	/// Message too large for its type
	MessageTooLarge(u64),
	/// Payload (de)serialization failure
	Serialization(ser::Error),
	/// Remote closed or we are winding the connection down
	ConnectionClose,
	/// Handshake with a peer speaking an unusably old protocol
	ProtocolMismatch {
		/// our protocol version
		us: u32,
		/// peer's protocol version
		peer: u32,
	},
	/// Accidental handshake with ourselves
	PeerWithSelf,
	/// Handshake did not follow version/verack order
	BadHandshake,
	/// Peer is not connected anymore
	PeerNotConnected,
	/// Too many connections of the peer's direction already
	ConnectionLimit,
	/// Server internal state error, e.g. run before start
	Internal(String),
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Connection(e)
	}
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Serialization(e)
	}
}

bitflags! {
	/// Service bits a node advertises in its version message.
	#[derive(Serialize, Deserialize)]
	pub struct ServiceFlags: u64 {
		/// No services advertised
		const NONE = 0;
		/// Can serve the full block chain
		const NODE_NETWORK = 1;
		/// Understands and serves witness data
		const NODE_WITNESS = 1 << 3;
	}
}

impl Default for ServiceFlags {
	fn default() -> ServiceFlags {
		ServiceFlags::NODE_NETWORK | ServiceFlags::NODE_WITNESS
	}
}

/// Who initiated a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
	/// Peer connected to us through the listener
	Inbound,
	/// We dialed the peer from the host pool
	Outbound,
	/// We dialed the peer because configuration says so
	Manual,
}

/// Configuration for the peer-to-peer server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct P2PConfig {
	/// Address the listener binds to
	pub host: IpAddr,
	/// Port the listener binds to; zero selects the network default
	pub port: u16,
	/// Highest protocol version we will negotiate
	pub protocol_maximum: u32,
	/// Cap on peers accepted through the listener
	pub inbound_connections: u32,
	/// Cap on peers dialed from the host pool
	pub outbound_connections: u32,
	/// Cap on remembered host addresses
	pub host_pool_capacity: u32,
	/// Size of the address rotation window
	pub rotation_size: u32,
	/// Hosts dialed as regular outbound peers
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub peers_seed: Option<Vec<SocketAddr>>,
	/// Hosts dialed persistently as manual peers
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub peers_connect: Option<Vec<SocketAddr>>,
	/// Service bits advertised to peers. Serializes as a table, keep last.
	#[serde(default)]
	pub services: ServiceFlags,
}

impl Default for P2PConfig {
	fn default() -> P2PConfig {
		P2PConfig {
			host: "0.0.0.0".parse().unwrap(),
			port: 0,
			protocol_maximum: global::PROTOCOL_VERSION,
			services: ServiceFlags::default(),
			inbound_connections: 100,
			outbound_connections: 8,
			host_pool_capacity: 10_000,
			rotation_size: 10_000_000,
			peers_seed: None,
			peers_connect: None,
		}
	}
}

impl P2PConfig {
	/// Listener port, resolving zero to the active network's default.
	pub fn port(&self) -> u16 {
		if self.port == 0 {
			global::default_p2p_port()
		} else {
			self.port
		}
	}
}

/// General information about a connected peer, settled by the handshake.
#[derive(Clone, Debug)]
pub struct PeerInfo {
	/// Services the peer advertised
	pub services: ServiceFlags,
	/// Peer user agent string
	pub user_agent: String,
	/// Negotiated protocol version
	pub version: u32,
	/// Peer network address
	pub addr: SocketAddr,
	/// Who dialed whom
	pub direction: Direction,
	/// Candidate chain height the peer reported at handshake
	pub height: u64,
}

/// Bridge between the networking layer and the rest of the system. Handles
/// the forwarding or querying of blocks, headers and transactions from the
/// network among other things.
pub trait NetAdapter: Send + Sync {
	/// Current height of our candidate chain.
	fn total_height(&self) -> u64;

	/// A set of block headers has been received, typically in response to a
	/// getheaders request. Returns false if the headers are unusable and
	/// the peer should be dropped.
	fn headers_received(&self, headers: Vec<BlockHeader>, addr: SocketAddr) -> bool;

	/// A block has been received from one of our peers. Returns false if
	/// the block is unusable and the peer should be dropped.
	fn block_received(&self, block: Block, addr: SocketAddr) -> bool;

	/// A transaction has been received from one of our peers.
	fn transaction_received(&self, tx: Transaction, addr: SocketAddr);

	/// Finds a list of block headers based on the provided locator. Tries
	/// to identify the common chain and gets the headers that follow it
	/// immediately.
	fn locate_headers(&self, locator: &[Hash]) -> Vec<BlockHeader>;

	/// Gets a full block by its hash, for serving peers.
	fn get_block(&self, hash: Hash) -> Option<Block>;

	/// Locator hashes describing our candidate chain, most recent first,
	/// used when asking a peer for the headers we miss.
	fn locator_hashes(&self) -> Vec<Hash>;
}

/// Extension points through which per-peer protocol sessions are attached
/// to the server. The server calls exactly one of these for every peer that
/// completes its handshake, on a thread it owns; implementations spawn
/// whatever session machinery they need and return.
pub trait SessionFactory: Send + Sync {
	/// A peer connected through the listener.
	fn attach_inbound_session(&self, peer: Arc<crate::peer::Peer>);

	/// A peer we dialed from the host pool.
	fn attach_outbound_session(&self, peer: Arc<crate::peer::Peer>);

	/// A peer we dialed on explicit configuration.
	fn attach_manual_session(&self, peer: Arc<crate::peer::Peer>);
}
