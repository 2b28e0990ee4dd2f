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

//! Registry of every connected peer, with the direction caps and the
//! housekeeping the server's monitor thread runs over it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Duration;
use chrono::Utc;

use bitnode_util::RwLock;

use crate::peer::Peer;
use crate::types::{Direction, P2PConfig};

/// Drop a peer we have not heard from in this long.
const INACTIVITY_SECS: i64 = 180;

/// Ping peers idle for this long so they have something to answer.
const PING_IDLE_SECS: i64 = 30;

/// All the peers the server is currently connected to.
pub struct Peers {
	config: P2PConfig,
	peers: RwLock<HashMap<SocketAddr, Arc<Peer>>>,
}

impl Peers {
	/// Empty registry under the given configuration.
	pub fn new(config: P2PConfig) -> Peers {
		Peers {
			config,
			peers: RwLock::new(HashMap::new()),
		}
	}

	/// Adds a newly handshaken peer.
	pub fn add_connected(&self, peer: Arc<Peer>) {
		debug!("Saving newly connected peer {}.", peer.info.addr);
		self.peers.write().insert(peer.info.addr, peer);
	}

	/// Whether we are connected to the address.
	pub fn is_known(&self, addr: &SocketAddr) -> bool {
		self.peers.read().contains_key(addr)
	}

	/// A connected peer by address.
	pub fn get_connected_peer(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
		self.peers.read().get(addr).cloned()
	}

	/// All connected peers.
	pub fn connected_peers(&self) -> Vec<Arc<Peer>> {
		self.peers.read().values().cloned().collect()
	}

	/// Number of peers we're currently connected to.
	pub fn peer_count(&self) -> u32 {
		self.peers.read().len() as u32
	}

	/// Number of connected peers of one direction.
	pub fn count_of(&self, direction: Direction) -> u32 {
		self.peers
			.read()
			.values()
			.filter(|p| p.info.direction == direction)
			.count() as u32
	}

	/// Whether the listener may accept another peer.
	pub fn accepting_inbound(&self) -> bool {
		self.count_of(Direction::Inbound) < self.config.inbound_connections
	}

	/// Whether the dialer should open another outbound connection.
	pub fn wants_outbound(&self) -> bool {
		self.count_of(Direction::Outbound) < self.config.outbound_connections
	}

	/// Removes a peer from the registry, closing its connection.
	pub fn remove(&self, addr: &SocketAddr) {
		if let Some(peer) = self.peers.write().remove(addr) {
			peer.stop();
		}
	}

	/// One housekeeping pass: drop dead and silent peers, ping the idle
	/// ones. Run periodically by the server's monitor thread.
	pub fn check_all(&self) {
		let now = Utc::now();
		let mut to_drop = vec![];
		for peer in self.connected_peers() {
			if !peer.is_connected() {
				to_drop.push(peer.info.addr);
				continue;
			}
			let idle = now - peer.last_seen();
			if idle > Duration::seconds(INACTIVITY_SECS) {
				info!("Dropping silent peer {}", peer.info.addr);
				to_drop.push(peer.info.addr);
			} else if idle > Duration::seconds(PING_IDLE_SECS) {
				if peer.send_ping().is_err() {
					to_drop.push(peer.info.addr);
				}
			}
		}
		for addr in to_drop {
			self.remove(&addr);
		}
	}

	/// Closes every connection and empties the registry.
	pub fn stop_all(&self) {
		let peers: Vec<Arc<Peer>> = self.peers.write().drain().map(|(_, p)| p).collect();
		for peer in peers {
			peer.stop();
		}
	}
}
