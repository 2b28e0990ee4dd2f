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

//! Per-peer protocol drivers. Outbound and manual sessions claim download
//! reservations and issue getdata for the reserved blocks; inbound
//! sessions supervise peers that mostly get served by the connection's
//! protocol handler. Every session winds down on node stop, peer death or
//! its own slow-peer verdict.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bitnode_chain::Chain;
use bitnode_p2p::Peer;

use crate::common::adapters::build_locator;
use crate::node::reservations::{Reservation, Reservations};

const EMPTY_QUEUE_BACKOFF_MS: u64 = 500;
const COMPLETION_POLL_MS: u64 = 100;

enum WaitOutcome {
	Completed,
	Abandoned,
	PeerLost,
	Slow,
}

/// Session driving block download against one peer we dialed, consuming
/// reservations until the node stops or the peer proves itself useless.
pub struct OutboundSession {
	peer: Arc<Peer>,
	chain: Arc<Chain>,
	reservations: Arc<Reservations>,
}

impl OutboundSession {
	/// New session over a handshaken peer.
	pub fn new(
		peer: Arc<Peer>,
		chain: Arc<Chain>,
		reservations: Arc<Reservations>,
	) -> OutboundSession {
		OutboundSession {
			peer,
			chain,
			reservations,
		}
	}

	/// Runs the session to completion. Blocks; callers give it a thread.
	pub fn run(&self) {
		debug!("Download session starting for {}", self.peer.info.addr);

		// the peer may know headers we don't, ask right away
		if self
			.peer
			.send_header_request(build_locator(&self.chain))
			.is_err()
		{
			return;
		}

		loop {
			if self.chain.stopped() || !self.peer.is_connected() {
				break;
			}

			let reservation = match self.reservations.get() {
				Some(r) => r,
				None => {
					thread::sleep(Duration::from_millis(EMPTY_QUEUE_BACKOFF_MS));
					continue;
				}
			};

			trace!(
				"{}: reserved block {} at {}",
				self.peer.info.addr,
				reservation.hash(),
				reservation.height()
			);

			if self.peer.send_block_request(reservation.hash()).is_err() {
				self.reservations.release(&reservation);
				break;
			}

			match self.wait_for(&reservation) {
				WaitOutcome::Completed => (),
				WaitOutcome::Abandoned => {
					// node is stopping, the slot dies with us
					break;
				}
				WaitOutcome::PeerLost => {
					self.reservations.release(&reservation);
					break;
				}
				WaitOutcome::Slow => {
					info!(
						"Dropping slow peer {}, returning block {} to the queue",
						self.peer.info.addr,
						reservation.height()
					);
					self.reservations.release(&reservation);
					self.peer.stop();
					break;
				}
			}
		}
		debug!("Download session done for {}", self.peer.info.addr);
	}

	// Polls until the reserved block arrived through the intake path or
	// the reservation must be given up.
	fn wait_for(&self, reservation: &Reservation) -> WaitOutcome {
		loop {
			if reservation.completed() {
				return WaitOutcome::Completed;
			}
			if self.chain.stopped() {
				return WaitOutcome::Abandoned;
			}
			if !self.peer.is_connected() {
				return WaitOutcome::PeerLost;
			}
			reservation.update_rate(self.peer.received_bytes_per_min());
			if self.reservations.slow(reservation) {
				return WaitOutcome::Slow;
			}
			thread::sleep(Duration::from_millis(COMPLETION_POLL_MS));
		}
	}
}

/// Session supervising a peer that connected to us. Serving headers and
/// blocks happens on the connection's handler; this loop only enforces
/// the session lifetime against node stop.
pub struct InboundSession {
	peer: Arc<Peer>,
	chain: Arc<Chain>,
}

impl InboundSession {
	/// New session over an accepted peer.
	pub fn new(peer: Arc<Peer>, chain: Arc<Chain>) -> InboundSession {
		InboundSession { peer, chain }
	}

	/// Runs the supervision loop to completion.
	pub fn run(&self) {
		debug!("Inbound session starting for {}", self.peer.info.addr);
		loop {
			if self.chain.stopped() {
				self.peer.stop();
				break;
			}
			if !self.peer.is_connected() {
				break;
			}
			thread::sleep(Duration::from_secs(1));
		}
		debug!("Inbound session done for {}", self.peer.info.addr);
	}
}
