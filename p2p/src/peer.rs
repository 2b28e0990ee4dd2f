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

//! A connected, handshaken peer: message send helpers on top of the
//! connection, and the protocol handler answering what the peer asks of us
//! (headers, blocks) while forwarding what it offers (headers, blocks,
//! transactions) into the net adapter.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use chrono::prelude::{DateTime, Utc};
use rand::{thread_rng, Rng};

use bitnode_core::core::hash::{Hash, ZERO_HASH};
use bitnode_core::core::{BlockHeader, Transaction};
use bitnode_core::global;

use crate::conn::{self, Conn, MessageHandler};
use crate::msg::{GetHeadersMsg, Inventory, Message, INV_BLOCK, INV_TX};
use crate::types::{Error, NetAdapter, PeerInfo};

/// One connected peer. Cheap helpers to talk to it; the answering side
/// lives on the connection's reader thread.
pub struct Peer {
	/// Peer information settled by the handshake
	pub info: PeerInfo,
	conn: Conn,
}

impl Peer {
	/// Wraps a handshaken stream into a served peer.
	pub fn new(
		stream: TcpStream,
		info: PeerInfo,
		adapter: Arc<dyn NetAdapter>,
	) -> Result<Arc<Peer>, Error> {
		let handler = ProtocolHandler {
			adapter,
			addr: info.addr,
		};
		let conn = conn::listen(stream, info.addr, handler)?;
		Ok(Arc::new(Peer { info, conn }))
	}

	/// Whether the connection threads still serve the socket.
	pub fn is_connected(&self) -> bool {
		self.conn.is_alive()
	}

	/// When we last received anything from this peer.
	pub fn last_seen(&self) -> DateTime<Utc> {
		self.conn.last_seen()
	}

	/// Bytes received from this peer over the last minute.
	pub fn received_bytes_per_min(&self) -> u64 {
		self.conn.received_bytes_per_min()
	}

	/// Sends a ping with a fresh nonce.
	pub fn send_ping(&self) -> Result<(), Error> {
		self.conn.send(Message::Ping(thread_rng().gen()))
	}

	/// Asks the peer for the headers following our locator.
	pub fn send_header_request(&self, locator: Vec<Hash>) -> Result<(), Error> {
		self.conn.send(Message::GetHeaders(GetHeadersMsg {
			version: self.info.version,
			locator,
			stop: ZERO_HASH,
		}))
	}

	/// Asks the peer for one full block.
	pub fn send_block_request(&self, hash: Hash) -> Result<(), Error> {
		self.conn.send(Message::GetData(vec![Inventory {
			inv_type: INV_BLOCK,
			hash,
		}]))
	}

	/// Announces a transaction to the peer.
	pub fn send_transaction(&self, tx: Transaction) -> Result<(), Error> {
		self.conn.send(Message::Tx(tx))
	}

	/// Sends a batch of headers, answering a header request.
	pub fn send_headers(&self, headers: Vec<BlockHeader>) -> Result<(), Error> {
		self.conn.send(Message::Headers(headers))
	}

	/// Closes the connection and stops its threads.
	pub fn stop(&self) {
		self.conn.close();
	}
}

// Serves the peer's requests out of the adapter and routes its offerings
// into the adapter. Runs on the connection reader thread.
struct ProtocolHandler {
	adapter: Arc<dyn NetAdapter>,
	addr: SocketAddr,
}

impl MessageHandler for ProtocolHandler {
	fn consume(&self, msg: Message) -> Result<Vec<Message>, Error> {
		match msg {
			Message::Ping(nonce) => Ok(vec![Message::Pong(nonce)]),
			Message::Pong(_) => Ok(vec![]),
			// late version/verack after handshake are harmless chatter
			Message::Version(_) | Message::Verack => Ok(vec![]),
			Message::GetHeaders(req) => {
				let headers = self.adapter.locate_headers(&req.locator);
				Ok(vec![Message::Headers(headers)])
			}
			Message::Headers(headers) => {
				if self.adapter.headers_received(headers, self.addr) {
					Ok(vec![])
				} else {
					Err(Error::ConnectionClose)
				}
			}
			Message::Inv(invs) => {
				// a block announcement means our candidate chain may be
				// behind, ask for the headers we miss
				if invs.iter().any(|inv| inv.inv_type == INV_BLOCK) {
					Ok(vec![Message::GetHeaders(GetHeadersMsg {
						version: global::PROTOCOL_VERSION,
						locator: self.adapter.locator_hashes(),
						stop: ZERO_HASH,
					})])
				} else {
					Ok(vec![])
				}
			}
			Message::GetData(invs) => {
				let mut replies = vec![];
				for inv in invs {
					if inv.inv_type == INV_BLOCK {
						if let Some(block) = self.adapter.get_block(inv.hash) {
							replies.push(Message::Block(block));
						}
					} else if inv.inv_type == INV_TX {
						trace!("{}: mempool requests not served", self.addr);
					}
				}
				Ok(replies)
			}
			Message::Block(block) => {
				if self.adapter.block_received(block, self.addr) {
					Ok(vec![])
				} else {
					Err(Error::ConnectionClose)
				}
			}
			Message::Tx(tx) => {
				self.adapter.transaction_received(tx, self.addr);
				Ok(vec![])
			}
			Message::Unknown(cmd) => {
				trace!("{}: ignoring unknown message {}", self.addr, cmd);
				Ok(vec![])
			}
		}
	}
}
