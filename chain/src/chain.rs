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

//! Facade around the chain store. Accepts headers, bodies and transactions
//! from the network, maintains the candidate and confirmed chain views and
//! publishes one reorganization event per commit, in commit order.
//!
//! Two parallel views are kept deliberately distinct: the candidate chain
//! is the sequence of headers the node intends to download; the confirmed
//! chain is the prefix of the candidate chain whose bodies are stored. The
//! download queue is a function of the first, the confirmed cursor of the
//! second.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitnode_core::consensus::work_from_bits;
use bitnode_core::core::hash::{Hash, Hashed};
use bitnode_core::core::{Block, BlockHeader, Transaction};
use bitnode_util::{Mutex, RwLock};

use crate::error::{Error, ErrorKind};
use crate::store::ChainStore;
use crate::types::{BlockHandler, HeaderHandler, Tip, TxHandler};

/// Facade to the blockchain engine. Thread-safe; writes are serialized
/// internally and subscription callbacks are delivered in commit order,
/// never concurrently with each other.
pub struct Chain {
	db_root: String,
	genesis: Block,
	store: RwLock<Option<ChainStore>>,
	// serializes commits so events leave in commit order
	commit_lock: Mutex<()>,
	header_subs: Mutex<Vec<HeaderHandler>>,
	block_subs: Mutex<Vec<BlockHandler>>,
	tx_subs: Mutex<Vec<TxHandler>>,
	mempool: Mutex<Vec<Transaction>>,
	stopped: AtomicBool,
}

impl Chain {
	/// Builds an unopened chain facade over the given database directory
	/// and network genesis. Nothing is touched until `start`.
	pub fn new(db_root: String, genesis: Block) -> Chain {
		Chain {
			db_root,
			genesis,
			store: RwLock::new(None),
			commit_lock: Mutex::new(()),
			header_subs: Mutex::new(vec![]),
			block_subs: Mutex::new(vec![]),
			tx_subs: Mutex::new(vec![]),
			mempool: Mutex::new(vec![]),
			stopped: AtomicBool::new(false),
		}
	}

	/// Creates the database directory and writes the genesis marker, the
	/// `--initchain` operation.
	pub fn bootstrap(db_root: &str, genesis: &Block) -> Result<(), Error> {
		ChainStore::bootstrap(db_root, genesis)
	}

	/// Opens the store. Fails when the directory was never initialized or
	/// records a different network's genesis.
	pub fn start(&self) -> Result<(), Error> {
		let store = ChainStore::open(&self.db_root, &self.genesis)?;
		*self.store.write() = Some(store);
		self.stopped.store(false, Ordering::SeqCst);
		debug!("chain store opened under {}", self.db_root);
		Ok(())
	}

	/// Enters the stopped state and delivers a final service-stopped
	/// notification to every remaining subscriber. Idempotent.
	pub fn stop(&self) -> Result<(), Error> {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		for handler in self.header_subs.lock().drain(..) {
			handler(Some(ErrorKind::ServiceStopped), 0, &[], &[]);
		}
		for handler in self.block_subs.lock().drain(..) {
			handler(Some(ErrorKind::ServiceStopped), 0, &[], &[]);
		}
		for handler in self.tx_subs.lock().drain(..) {
			handler(
				Some(ErrorKind::ServiceStopped),
				&Transaction {
					version: 0,
					inputs: vec![],
					outputs: vec![],
					lock_time: 0,
				},
			);
		}
		Ok(())
	}

	/// Releases the store. Must follow `stop`.
	pub fn close(&self) -> Result<(), Error> {
		*self.store.write() = None;
		Ok(())
	}

	/// Whether the chain has entered the stopped state.
	pub fn stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	/// The highest confirmed block (`candidate == false`) or the highest
	/// candidate header (`candidate == true`). Fails iff the store is
	/// unusable.
	pub fn get_top(&self, candidate: bool) -> Result<Tip, Error> {
		let store = self.store.read();
		let store = store
			.as_ref()
			.ok_or_else(|| Error::from(ErrorKind::Corrupt("store not open".to_owned())))?;
		if candidate {
			Ok(store.candidate_tip())
		} else {
			Ok(store.confirmed_tip())
		}
	}

	/// The highest candidate position whose body has been downloaded and
	/// validated; seeds the download queue.
	pub fn top_valid_candidate_state(&self) -> Result<Tip, Error> {
		let store = self.store.read();
		let store = store
			.as_ref()
			.ok_or_else(|| Error::from(ErrorKind::Corrupt("store not open".to_owned())))?;
		Ok(store.confirmed_tip())
	}

	/// The candidate header hash at `height` if its body has not yet been
	/// stored, None otherwise.
	pub fn get_downloadable(&self, height: u64) -> Result<Option<Hash>, Error> {
		let store = self.store.read();
		let store = store
			.as_ref()
			.ok_or_else(|| Error::from(ErrorKind::Corrupt("store not open".to_owned())))?;
		match store.entry_at(height) {
			Some(entry) if !store.has_body(&entry.hash) => Ok(Some(entry.hash)),
			_ => Ok(None),
		}
	}

	/// The candidate header hash at `height`, stored body or not.
	pub fn get_candidate(&self, height: u64) -> Result<Option<Hash>, Error> {
		let store = self.store.read();
		let store = store
			.as_ref()
			.ok_or_else(|| Error::from(ErrorKind::Corrupt("store not open".to_owned())))?;
		Ok(store.entry_at(height).map(|e| e.hash))
	}

	/// Whether a body has been stored for the hash.
	pub fn has_block(&self, hash: &Hash) -> bool {
		match self.store.read().as_ref() {
			Some(store) => store.has_body(hash),
			None => false,
		}
	}

	/// A stored block body.
	pub fn get_block(&self, hash: &Hash) -> Option<Arc<Block>> {
		self.store.read().as_ref().and_then(|s| s.body(hash))
	}

	/// Height of the candidate chain, advertised to peers on handshake.
	pub fn total_height(&self) -> u64 {
		match self.store.read().as_ref() {
			Some(store) => store.candidate_tip().height,
			None => 0,
		}
	}

	/// Finds the headers following the first locator hash found on the
	/// candidate chain, serving a peer's getheaders. An unknown locator
	/// restarts from the block after genesis.
	pub fn locate_headers(&self, locator: &[Hash], max: usize) -> Vec<BlockHeader> {
		let store = self.store.read();
		let store = match store.as_ref() {
			Some(s) => s,
			None => return vec![],
		};
		let mut start = 1;
		for hash in locator {
			if let Some(height) = store.candidate_height(hash) {
				start = height + 1;
				break;
			}
		}
		let mut headers = vec![];
		let mut height = start;
		while headers.len() < max {
			match store.entry_at(height) {
				Some(entry) => headers.push((*entry.header).clone()),
				None => break,
			}
			height += 1;
		}
		headers
	}

	/// Accepts a contiguous batch of headers from a peer. If the batch
	/// (together with any parked fork headers it builds on) carries more
	/// work than the current candidate chain, the candidate view is
	/// reorganized and one header event is published; a losing branch is
	/// parked for later.
	pub fn process_headers(&self, headers: &[BlockHeader]) -> Result<(), Error> {
		if headers.is_empty() {
			return Ok(());
		}
		if self.stopped() {
			return Err(ErrorKind::ServiceStopped.into());
		}
		let commit = self.commit_lock.lock();
		self.process_headers_inner(headers)?;
		drop(commit);
		Ok(())
	}

	// Commit lock must be held.
	fn process_headers_inner(&self, headers: &[BlockHeader]) -> Result<(), Error> {
		for pair in headers.windows(2) {
			if pair[1].prev_hash != pair[0].hash() {
				return Err(ErrorKind::DiscontiguousHeaders.into());
			}
		}

		let (fork_height, incoming, outgoing, blocks_out) = {
			let mut store_opt = self.store.write();
			let store = store_opt
				.as_mut()
				.ok_or_else(|| Error::from(ErrorKind::Corrupt("store not open".to_owned())))?;

			// peers answer locators with overlap, drop the prefix already
			// on the candidate chain
			let mut skip = 0;
			while skip < headers.len()
				&& store.candidate_height(&headers[skip].hash()).is_some()
			{
				skip += 1;
			}
			let headers = &headers[skip..];
			if headers.is_empty() {
				return Ok(());
			}

			// walk back through parked fork headers to a candidate position
			let mut below = vec![];
			let mut cursor = headers[0].prev_hash;
			let fork_height = loop {
				if let Some(height) = store.candidate_height(&cursor) {
					break height;
				}
				match store.fork_header(&cursor) {
					Some(header) => {
						cursor = header.prev_hash;
						below.push(header);
					}
					None => return Err(ErrorKind::OrphanHeaders(headers[0].hash()).into()),
				}
			};
			below.reverse();

			let mut branch: Vec<Arc<BlockHeader>> = below;
			branch.extend(headers.iter().cloned().map(Arc::new));

			let branch_work: u128 = store.work_at(fork_height)
				+ branch.iter().map(|h| work_from_bits(h.bits)).sum::<u128>();

			if branch_work <= store.total_work() {
				// not the best branch, park everything for later
				for header in branch {
					store.add_fork_header(header);
				}
				return Ok(());
			}

			let old_top_valid = store.top_valid();
			let removed = store.truncate_candidate(fork_height);
			for header in &branch {
				store.append_candidate(header.clone());
			}

			// bodies confirmed on the outgoing branch are unconfirmed now
			let mut blocks_out = vec![];
			if fork_height < old_top_valid {
				for entry in removed.iter().take((old_top_valid - fork_height) as usize) {
					if let Some(body) = store.body(&entry.hash) {
						blocks_out.push(body);
					}
				}
				store.set_top_valid(fork_height);
			}

			let outgoing: Vec<Arc<BlockHeader>> =
				removed.into_iter().map(|e| e.header).collect();
			(fork_height, branch, outgoing, blocks_out)
		};

		debug!(
			"header reindex at fork {}: {} incoming, {} outgoing",
			fork_height,
			incoming.len(),
			outgoing.len()
		);
		self.notify_headers(None, fork_height, &incoming, &outgoing);

		// bodies already stored for the new branch confirm immediately
		let blocks_in = {
			let mut store_opt = self.store.write();
			match store_opt.as_mut() {
				Some(store) => store.advance_top_valid(),
				None => vec![],
			}
		};
		if !blocks_out.is_empty() || !blocks_in.is_empty() {
			self.notify_blocks(None, fork_height, &blocks_in, &blocks_out);
		}
		Ok(())
	}

	/// Accepts a block body from a peer. The body is stored if its header
	/// is known (processing the header first if the block extends the
	/// candidate tip directly) and the confirmed cursor advances over every
	/// contiguous stored body, publishing one block event for the move.
	pub fn process_block(&self, block: Block) -> Result<(), Error> {
		if self.stopped() {
			return Err(ErrorKind::ServiceStopped.into());
		}
		let commit = self.commit_lock.lock();

		let hash = block.hash();
		let (already_stored, header_known) = {
			let store_opt = self.store.read();
			let store = store_opt
				.as_ref()
				.ok_or_else(|| Error::from(ErrorKind::Corrupt("store not open".to_owned())))?;
			(store.has_body(&hash), store.header_known(&hash))
		};
		if already_stored {
			return Ok(());
		}
		if !header_known {
			self.process_headers_inner(&[block.header.clone()])?;
		}

		if !block.verify_merkle_root() {
			return Err(ErrorKind::BadMerkleRoot(hash).into());
		}

		let (old_top_valid, confirmed) = {
			let mut store_opt = self.store.write();
			let store = store_opt
				.as_mut()
				.ok_or_else(|| Error::from(ErrorKind::Corrupt("store not open".to_owned())))?;
			store.store_body(Arc::new(block));
			let old_top_valid = store.top_valid();
			let confirmed = store.advance_top_valid();
			(old_top_valid, confirmed)
		};

		if !confirmed.is_empty() {
			debug!(
				"block reorg at fork {}: {} incoming",
				old_top_valid,
				confirmed.len()
			);
			self.notify_blocks(None, old_top_valid, &confirmed, &[]);
		}
		drop(commit);
		Ok(())
	}

	/// Accepts a transaction into the memory pool and publishes a
	/// transaction event. Content validation is out of scope here.
	pub fn process_transaction(&self, tx: Transaction) -> Result<(), Error> {
		if self.stopped() {
			return Err(ErrorKind::ServiceStopped.into());
		}
		let commit = self.commit_lock.lock();
		{
			let mut pool = self.mempool.lock();
			let tx_hash = tx.hash();
			if pool.iter().any(|t| t.hash() == tx_hash) {
				return Ok(());
			}
			pool.push(tx.clone());
		}
		self.notify_txs(None, &tx);
		drop(commit);
		Ok(())
	}

	/// Registers a handler for header-chain reorganizations. A handler
	/// returning false is dropped; a handler observing service-stopped must
	/// unsubscribe that way. Subscribing on a stopped chain delivers the
	/// stop notification immediately.
	pub fn subscribe_headers(&self, handler: HeaderHandler) {
		if self.stopped() {
			handler(Some(ErrorKind::ServiceStopped), 0, &[], &[]);
			return;
		}
		self.header_subs.lock().push(handler);
	}

	/// Registers a handler for block-chain reorganizations.
	pub fn subscribe_blocks(&self, handler: BlockHandler) {
		if self.stopped() {
			handler(Some(ErrorKind::ServiceStopped), 0, &[], &[]);
			return;
		}
		self.block_subs.lock().push(handler);
	}

	/// Registers a handler for memory pool arrivals.
	pub fn subscribe_transactions(&self, handler: TxHandler) {
		self.tx_subs.lock().push(handler);
	}

	// Handlers run outside any store or subscriber lock so they may call
	// back into the chain; survivors are reinstated afterwards unless a
	// stop happened in between, in which case they get their final
	// notification here.
	fn notify_headers(
		&self,
		ec: Option<ErrorKind>,
		fork_height: u64,
		incoming: &[Arc<BlockHeader>],
		outgoing: &[Arc<BlockHeader>],
	) {
		let handlers: Vec<HeaderHandler> = self.header_subs.lock().drain(..).collect();
		let mut keep = vec![];
		for handler in handlers {
			if handler(ec.clone(), fork_height, incoming, outgoing) {
				keep.push(handler);
			}
		}
		if self.stopped() {
			for handler in keep {
				handler(Some(ErrorKind::ServiceStopped), 0, &[], &[]);
			}
		} else {
			self.header_subs.lock().extend(keep);
		}
	}

	fn notify_blocks(
		&self,
		ec: Option<ErrorKind>,
		fork_height: u64,
		incoming: &[Arc<Block>],
		outgoing: &[Arc<Block>],
	) {
		let handlers: Vec<BlockHandler> = self.block_subs.lock().drain(..).collect();
		let mut keep = vec![];
		for handler in handlers {
			if handler(ec.clone(), fork_height, incoming, outgoing) {
				keep.push(handler);
			}
		}
		if self.stopped() {
			for handler in keep {
				handler(Some(ErrorKind::ServiceStopped), 0, &[], &[]);
			}
		} else {
			self.block_subs.lock().extend(keep);
		}
	}

	fn notify_txs(&self, ec: Option<ErrorKind>, tx: &Transaction) {
		let handlers: Vec<TxHandler> = self.tx_subs.lock().drain(..).collect();
		let mut keep = vec![];
		for handler in handlers {
			if handler(ec.clone(), tx) {
				keep.push(handler);
			}
		}
		self.tx_subs.lock().extend(keep);
	}
}
