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

//! Adapters connecting the network events (new peers, headers, blocks and
//! transactions received) to the chain engine and the reservation queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use bitnode_chain::{Chain, ErrorKind};
use bitnode_core::core::hash::Hash;
use bitnode_core::core::{Block, BlockHeader, Transaction};
use bitnode_p2p as p2p;
use bitnode_p2p::{Peer, SessionFactory, MAX_BLOCK_HEADERS, MAX_LOCATORS};
use bitnode_util::LateInit;

use crate::node::reservations::Reservations;
use crate::node::sessions::{InboundSession, OutboundSession};

/// Implementation of the NetAdapter for the node. Gets notified when new
/// headers, blocks and transactions are received and forwards them to the
/// chain and the reservation queue.
pub struct NetToChainAdapter {
	chain: Arc<Chain>,
	reservations: LateInit<Arc<Reservations>>,
}

impl NetToChainAdapter {
	/// Adapter over the chain; the reservation queue is wired in once it
	/// exists.
	pub fn new(chain: Arc<Chain>) -> NetToChainAdapter {
		NetToChainAdapter {
			chain,
			reservations: LateInit::new(),
		}
	}

	/// Wires the reservation queue. Called once during node composition.
	pub fn init(&self, reservations: Arc<Reservations>) {
		self.reservations.set(reservations);
	}
}

impl p2p::NetAdapter for NetToChainAdapter {
	fn total_height(&self) -> u64 {
		self.chain.total_height()
	}

	fn headers_received(&self, headers: Vec<BlockHeader>, addr: SocketAddr) -> bool {
		if headers.is_empty() {
			return true;
		}
		debug!("Received {} headers from {}", headers.len(), addr);
		match self.chain.process_headers(&headers) {
			Ok(()) => true,
			Err(e) => match e.kind() {
				ErrorKind::OrphanHeaders(h) => {
					// the peer is on a branch we can't connect yet
					debug!("{}: orphan header batch at {}", addr, h);
					true
				}
				ErrorKind::ServiceStopped | ErrorKind::Corrupt(_) => false,
				kind => {
					debug!("{}: rejecting headers: {}", addr, kind);
					false
				}
			},
		}
	}

	fn block_received(&self, block: Block, addr: SocketAddr) -> bool {
		debug!(
			"Received block {} from {}, {} txs, going to process.",
			block.hash(),
			addr,
			block.txs.len(),
		);
		match self.reservations.get().done(block) {
			Ok(_) => true,
			Err(e) => match e.kind() {
				ErrorKind::ServiceStopped | ErrorKind::Corrupt(_) => false,
				kind => {
					debug!("{}: rejecting block: {}", addr, kind);
					false
				}
			},
		}
	}

	fn transaction_received(&self, tx: Transaction, addr: SocketAddr) {
		if let Err(e) = self.chain.process_transaction(tx) {
			debug!("{}: transaction rejected: {}", addr, e);
		}
	}

	fn locate_headers(&self, locator: &[Hash]) -> Vec<BlockHeader> {
		self.chain.locate_headers(locator, MAX_BLOCK_HEADERS)
	}

	fn get_block(&self, hash: Hash) -> Option<Block> {
		self.chain.get_block(&hash).map(|b| (*b).clone())
	}

	fn locator_hashes(&self) -> Vec<Hash> {
		build_locator(&self.chain)
	}
}

/// Block locator over the candidate chain: dense for the most recent
/// blocks, then exponentially sparser, genesis always last.
pub fn build_locator(chain: &Chain) -> Vec<Hash> {
	let tip_height = chain.total_height();
	let mut hashes = vec![];
	let mut height = tip_height as i64;
	let mut step = 1i64;
	while height > 0 && hashes.len() < MAX_LOCATORS - 1 {
		if let Ok(Some(hash)) = chain.get_candidate(height as u64) {
			hashes.push(hash);
		}
		if hashes.len() >= 10 {
			step *= 2;
		}
		height -= step;
	}
	if let Ok(Some(genesis)) = chain.get_candidate(0) {
		hashes.push(genesis);
	}
	hashes
}

/// Session factory attaching a protocol driver thread to every peer the
/// network hands us, per direction.
pub struct NodeSessionFactory {
	chain: Arc<Chain>,
	reservations: Arc<Reservations>,
}

impl NodeSessionFactory {
	/// Factory wiring sessions to the given chain and reservation queue.
	pub fn new(chain: Arc<Chain>, reservations: Arc<Reservations>) -> NodeSessionFactory {
		NodeSessionFactory {
			chain,
			reservations,
		}
	}

	fn spawn_download_session(&self, peer: Arc<Peer>, name: &str) {
		let session = OutboundSession::new(
			peer,
			self.chain.clone(),
			self.reservations.clone(),
		);
		let _ = thread::Builder::new()
			.name(name.to_string())
			.spawn(move || session.run());
	}
}

impl SessionFactory for NodeSessionFactory {
	fn attach_inbound_session(&self, peer: Arc<Peer>) {
		let session = InboundSession::new(peer, self.chain.clone());
		let _ = thread::Builder::new()
			.name("inbound_session".to_string())
			.spawn(move || session.run());
	}

	fn attach_outbound_session(&self, peer: Arc<Peer>) {
		self.spawn_download_session(peer, "outbound_session");
	}

	fn attach_manual_session(&self, peer: Arc<Peer>) {
		self.spawn_download_session(peer, "manual_session");
	}
}
