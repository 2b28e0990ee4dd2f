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

//! The full node: composes the chain engine, the p2p server and the
//! download reservation queue, owns the lifecycle state machine and keeps
//! the queue coherent across header and block reorganizations.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use fs2::FileExt;

use bitnode_chain::{Chain, ErrorKind, Tip};
use bitnode_core::core::hash::Hashed;
use bitnode_core::core::{Block, BlockHeader};
use bitnode_core::{genesis, global};
use bitnode_p2p as p2p;
use bitnode_util::{Mutex, RwLock};

use crate::common::adapters::{NetToChainAdapter, NodeSessionFactory};
use crate::common::types::{Error, NodeConfig};
use crate::node::reservations::Reservations;

/// Lifecycle position of the node. Only the transitions `start`, `run`,
/// `stop` and `close` move it, always under the one state mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
	/// Constructed, nothing started yet
	Unstarted,
	/// start() is bringing the components up
	Starting,
	/// Components up, run() not called yet
	Started,
	/// Subscribed and downloading
	Running,
	/// stop() or an error path is winding the components down
	Stopping,
	/// Components stopped, close() not called yet
	Stopped,
	/// Everything released
	Closed,
}

/// The two chain views the node caches, refreshed on every reorg event.
#[derive(Debug, Clone, Copy)]
pub struct ChainTop {
	/// Tip of the confirmed block chain
	pub confirmed: Tip,
	/// Tip of the candidate header chain
	pub candidate: Tip,
}

// The slice of the node the reorg handlers and error paths need.
#[derive(Clone)]
struct ShutdownHandle {
	chain: Arc<Chain>,
	network: Arc<p2p::Server>,
	state: Arc<Mutex<NodeState>>,
}

impl ShutdownHandle {
	// Error-path stop: flips the lifecycle and winds both components
	// down. Safe to call from within a subscription handler.
	fn initiate(&self) {
		{
			let mut state = self.state.lock();
			match *state {
				NodeState::Stopping | NodeState::Stopped | NodeState::Closed => return,
				_ => *state = NodeState::Stopping,
			}
		}
		self.network.stop();
		if let Err(e) = self.chain.stop() {
			error!("Chain failed to stop: {}", e);
		}
		*self.state.lock() = NodeState::Stopped;
	}
}

fn is_stopped(state: &Mutex<NodeState>) -> bool {
	match *state.lock() {
		NodeState::Stopping | NodeState::Stopped | NodeState::Closed => true,
		_ => false,
	}
}

/// Full node holding internal structures: the chain engine, the network
/// server and the block download queue between them.
pub struct FullNode {
	/// node config
	pub config: NodeConfig,
	chain: Arc<Chain>,
	network: Arc<p2p::Server>,
	reservations: Arc<Reservations>,
	top: Arc<RwLock<ChainTop>>,
	state: Arc<Mutex<NodeState>>,
	// Maintain a lock file so we do not run multiple nodes from same dir.
	lock_file: Arc<File>,
}

impl FullNode {
	/// Composes a node from its configuration. Nothing is started;
	/// components come up in `start` and work begins in `run`.
	pub fn new(mut config: NodeConfig) -> Result<FullNode, Error> {
		if config.index_addresses {
			warn!("Address indexing is not supported by this node, disabling.");
			config.index_addresses = false;
		}
		global::set_chain_type(config.chain_type);

		// Obtain our lock file or fail immediately with an error.
		let lock_file = FullNode::one_node_at_a_time(&config)?;

		let genesis = genesis::genesis();
		info!("Node genesis block: {}", genesis.hash());

		let chain = Arc::new(Chain::new(config.db_root.clone(), genesis.clone()));

		let net_adapter = Arc::new(NetToChainAdapter::new(chain.clone()));
		let network = Arc::new(p2p::Server::new(
			config.p2p_config.clone(),
			net_adapter.clone(),
		));

		let reservations = Reservations::new(&config);
		reservations.init(chain.clone());
		net_adapter.init(reservations.clone());

		network.set_session_factory(Arc::new(NodeSessionFactory::new(
			chain.clone(),
			reservations.clone(),
		)));

		let top = ChainTop {
			confirmed: Tip::new(genesis.hash()),
			candidate: Tip::new(genesis.hash()),
		};

		Ok(FullNode {
			config,
			chain,
			network,
			reservations,
			top: Arc::new(RwLock::new(top)),
			state: Arc::new(Mutex::new(NodeState::Unstarted)),
			lock_file,
		})
	}

	// Exclusive (advisory) lock file to ensure we do not run multiple
	// instances of the node from the same dir.
	fn one_node_at_a_time(config: &NodeConfig) -> Result<Arc<File>, Error> {
		let path = Path::new(&config.db_root);
		fs::create_dir_all(path)?;
		let path = path.join("bitnode.lock");
		let lock_file = fs::OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(&path)?;
		lock_file.try_lock_exclusive().map_err(|e| {
			error!("Failed to lock {:?} (node already running?)", path);
			Error::from(e)
		})?;
		Ok(Arc::new(lock_file))
	}

	/// Brings the chain up, then the network. Fails with operation_failed
	/// unless the node has never been started.
	pub fn start(&self) -> Result<(), Error> {
		{
			let mut state = self.state.lock();
			match *state {
				NodeState::Unstarted => *state = NodeState::Starting,
				_ => {
					error!("Node start called out of order.");
					return Err(Error::OperationFailed("node already started".to_owned()));
				}
			}
		}

		if let Err(e) = self.chain.start() {
			error!("Node failed to start chain: {}", e);
			*self.state.lock() = NodeState::Unstarted;
			return Err(Error::OperationFailed(format!("chain start: {}", e)));
		}

		if let Err(e) = self.network.start() {
			error!("Node failed to start network: {:?}", e);
			let _ = self.chain.stop();
			let _ = self.chain.close();
			*self.state.lock() = NodeState::Unstarted;
			return Err(Error::OperationFailed(format!("network start: {:?}", e)));
		}

		*self.state.lock() = NodeState::Started;
		info!("Node started.");
		Ok(())
	}

	/// Seeds the download queue from the candidate chain, subscribes the
	/// reorg handlers and sets the network loose. Fails with
	/// service_stopped unless the node is freshly started.
	pub fn run(&self) -> Result<(), Error> {
		{
			let mut state = self.state.lock();
			match *state {
				NodeState::Started => *state = NodeState::Running,
				_ => return Err(Error::ServiceStopped),
			}
		}

		let confirmed = match self.chain.get_top(false) {
			Ok(tip) => tip,
			Err(e) => {
				error!("The chain is corrupt: {}", e);
				return Err(Error::OperationFailed(format!("{}", e)));
			}
		};
		let candidate = match self.chain.get_top(true) {
			Ok(tip) => tip,
			Err(e) => {
				error!("The chain is corrupt: {}", e);
				return Err(Error::OperationFailed(format!("{}", e)));
			}
		};

		info!("Top confirmed block height is ({})", confirmed.height);
		info!("Top candidate block height is ({})", candidate.height);

		{
			let mut top = self.top.write();
			top.confirmed = confirmed;
			top.candidate = candidate;
		}

		let top_valid = match self.chain.top_valid_candidate_state() {
			Ok(tip) => tip.height,
			Err(e) => {
				error!("The chain is corrupt: {}", e);
				return Err(Error::OperationFailed(format!("{}", e)));
			}
		};
		let start_height = top_valid + 1;

		// Re-seed the queue from the candidate top downward. The first
		// non-downloaded height always goes in, body present or not, so
		// download never stalls on an empty next candidate. Genesis is
		// below start_height by construction and terminates the scan.
		for height in (start_height..=candidate.height).rev() {
			match self.chain.get_downloadable(height) {
				Ok(Some(hash)) => self.reservations.push_front(hash, height),
				Ok(None) => {
					if height == start_height {
						if let Ok(Some(hash)) = self.chain.get_candidate(height) {
							self.reservations.push_front(hash, height);
						}
					}
				}
				Err(e) => {
					error!("The chain is corrupt: {}", e);
					return Err(Error::OperationFailed(format!("{}", e)));
				}
			}
		}
		debug!(
			"Seeded {} reservations from the candidate chain.",
			self.reservations.size()
		);

		let shutdown = ShutdownHandle {
			chain: self.chain.clone(),
			network: self.network.clone(),
			state: self.state.clone(),
		};

		{
			let reservations = self.reservations.clone();
			let top = self.top.clone();
			let state = self.state.clone();
			let shutdown = shutdown.clone();
			self.chain.subscribe_headers(Box::new(
				move |ec, fork_height, incoming, outgoing| {
					handle_reindexed(
						ec,
						fork_height,
						incoming,
						outgoing,
						&reservations,
						&top,
						&|| is_stopped(&state),
						&|| shutdown.initiate(),
					)
				},
			));
		}
		{
			let top = self.top.clone();
			let state = self.state.clone();
			self.chain.subscribe_blocks(Box::new(
				move |ec, fork_height, incoming, outgoing| {
					handle_reorganized(
						ec,
						fork_height,
						incoming,
						outgoing,
						&top,
						&|| is_stopped(&state),
						&|| shutdown.initiate(),
					)
				},
			));
		}

		if let Err(e) = self.network.run() {
			error!("Node failed to run network: {:?}", e);
			return Err(Error::OperationFailed(format!("network run: {:?}", e)));
		}
		info!("Node running.");
		Ok(())
	}

	/// Stops the network, then the chain, logging each independently and
	/// returning the conjunction. A no-op success while already stopping
	/// or beyond.
	pub fn stop(&self) -> Result<(), Error> {
		{
			let mut state = self.state.lock();
			match *state {
				NodeState::Stopping | NodeState::Stopped | NodeState::Closed => {
					return Ok(());
				}
				_ => *state = NodeState::Stopping,
			}
		}

		self.network.stop();
		info!("P2P server stopped.");

		let chain_ok = match self.chain.stop() {
			Ok(()) => {
				info!("Chain stopped.");
				true
			}
			Err(e) => {
				error!("Chain failed to stop: {}", e);
				false
			}
		};

		*self.state.lock() = NodeState::Stopped;
		if chain_ok {
			Ok(())
		} else {
			Err(Error::OperationFailed("chain stop failed".to_owned()))
		}
	}

	/// Stops if needed, then releases the components. Must be called from
	/// the thread that constructed the node.
	pub fn close(&self) -> Result<(), Error> {
		self.stop()?;

		self.network.close();
		info!("P2P server closed.");

		let chain_ok = match self.chain.close() {
			Ok(()) => {
				info!("Chain closed.");
				true
			}
			Err(e) => {
				error!("Chain failed to close: {}", e);
				false
			}
		};

		*self.state.lock() = NodeState::Closed;
		let _ = self.lock_file.unlock();
		if chain_ok {
			Ok(())
		} else {
			Err(Error::OperationFailed("chain close failed".to_owned()))
		}
	}

	/// Whether the node has entered (or passed) the stopping state.
	pub fn stopped(&self) -> bool {
		is_stopped(&self.state)
	}

	/// Current lifecycle position.
	pub fn state(&self) -> NodeState {
		*self.state.lock()
	}

	/// The cached chain views, as of the latest reorg events.
	pub fn chain_top(&self) -> ChainTop {
		*self.top.read()
	}

	/// The chain engine, shared with sessions.
	pub fn chain(&self) -> Arc<Chain> {
		self.chain.clone()
	}

	/// The download queue.
	pub fn reservations(&self) -> Arc<Reservations> {
		self.reservations.clone()
	}

	/// Number of connected peers.
	pub fn peer_count(&self) -> u32 {
		self.network.peer_count()
	}
}

// Header-chain reorg handler. Rolls outgoing candidate headers off the
// queue tail (high heights first, so only tail entries are candidates for
// removal) and appends incoming ones low-first, so the queue tail always
// reflects the newest candidate. Returns the keep-subscription flag.
pub(crate) fn handle_reindexed(
	ec: Option<ErrorKind>,
	fork_height: u64,
	incoming: &[Arc<BlockHeader>],
	outgoing: &[Arc<BlockHeader>],
	reservations: &Reservations,
	top: &RwLock<ChainTop>,
	stopped: &dyn Fn() -> bool,
	initiate_stop: &dyn Fn(),
) -> bool {
	if stopped() || ec == Some(ErrorKind::ServiceStopped) {
		return false;
	}
	if let Some(kind) = ec {
		error!("Failure handling reindex: {}", kind);
		initiate_stop();
		return false;
	}
	if incoming.is_empty() {
		return true;
	}

	let mut height = fork_height + outgoing.len() as u64;
	for header in outgoing.iter().rev() {
		reservations.pop_back(&header.hash(), height);
		height -= 1;
	}
	for header in incoming.iter() {
		height += 1;
		reservations.push_back(header.hash(), height);
	}

	if let Some(last) = incoming.last() {
		top.write().candidate = Tip {
			hash: last.hash(),
			height: fork_height + incoming.len() as u64,
		};
	}
	true
}

// Block-chain reorg handler. The header reindex is authoritative for the
// download queue; here only the confirmed cursor cache moves.
pub(crate) fn handle_reorganized(
	ec: Option<ErrorKind>,
	fork_height: u64,
	incoming: &[Arc<Block>],
	_outgoing: &[Arc<Block>],
	top: &RwLock<ChainTop>,
	stopped: &dyn Fn() -> bool,
	initiate_stop: &dyn Fn(),
) -> bool {
	if stopped() || ec == Some(ErrorKind::ServiceStopped) {
		return false;
	}
	if let Some(kind) = ec {
		error!("Failure handling reorganization: {}", kind);
		initiate_stop();
		return false;
	}

	if let Some(last) = incoming.last() {
		top.write().confirmed = Tip {
			hash: last.hash(),
			height: fork_height + incoming.len() as u64,
		};
	}
	true
}

#[cfg(test)]
mod tests {
	use super::*;
	use bitnode_core::consensus::REGTEST_GENESIS_BITS;
	use bitnode_core::core::hash::{Hash, ZERO_HASH};
	use std::sync::atomic::{AtomicBool, Ordering};

	fn header(salt: u32) -> Arc<BlockHeader> {
		Arc::new(BlockHeader {
			version: 1,
			prev_hash: ZERO_HASH,
			merkle_root: ZERO_HASH,
			timestamp: salt,
			bits: REGTEST_GENESIS_BITS,
			nonce: salt,
		})
	}

	fn fixture() -> (Arc<Reservations>, RwLock<ChainTop>) {
		let reservations = Reservations::new(&NodeConfig::default());
		let top = RwLock::new(ChainTop {
			confirmed: Tip::new(ZERO_HASH),
			candidate: Tip::new(ZERO_HASH),
		});
		(reservations, top)
	}

	fn tail_entry(reservations: &Reservations) -> Option<(Hash, u64)> {
		// drain to find the tail, for assertions only
		let mut last = None;
		while let Some(r) = reservations.get() {
			last = Some((r.hash(), r.height()));
		}
		last
	}

	#[test]
	fn single_block_extension_lands_on_the_tail() {
		// candidate=confirmed=100, one header announced at 101
		let (reservations, top) = fixture();
		let incoming = vec![header(101)];

		let keep = handle_reindexed(
			None,
			100,
			&incoming,
			&[],
			&reservations,
			&top,
			&|| false,
			&|| panic!("no stop expected"),
		);

		assert!(keep);
		assert_eq!(reservations.size(), 1);
		assert_eq!(tail_entry(&reservations), Some((incoming[0].hash(), 101)));
		let top = top.read();
		assert_eq!(top.candidate.height, 101);
		assert_eq!(top.candidate.hash, incoming[0].hash());
	}

	#[test]
	fn two_block_reorg_rewrites_the_tail() {
		// candidate top at 200 with H199, H200 queued; competing chain
		// reorgs at fork 198 with three incoming headers
		let (reservations, top) = fixture();
		let outgoing = vec![header(199), header(200)];
		reservations.push_back(outgoing[0].hash(), 199);
		reservations.push_back(outgoing[1].hash(), 200);

		let incoming = vec![header(1199), header(1200), header(1201)];
		let keep = handle_reindexed(
			None,
			198,
			&incoming,
			&outgoing,
			&reservations,
			&top,
			&|| false,
			&|| panic!("no stop expected"),
		);

		assert!(keep);
		assert_eq!(reservations.size(), 3);
		assert_eq!(top.read().candidate.height, 201);

		// queue front-to-back must now be 199', 200', 201'
		let drained: Vec<(Hash, u64)> = std::iter::from_fn(|| {
			reservations.get().map(|r| (r.hash(), r.height()))
		})
		.collect();
		assert_eq!(
			drained,
			vec![
				(incoming[0].hash(), 199),
				(incoming[1].hash(), 200),
				(incoming[2].hash(), 201),
			]
		);
	}

	#[test]
	fn outgoing_not_on_the_tail_is_left_alone() {
		// a held or missing tail entry must not be popped
		let (reservations, top) = fixture();
		let stale = header(7);
		reservations.push_back(stale.hash(), 5);

		let outgoing = vec![header(8)];
		let incoming = vec![header(9)];
		handle_reindexed(
			None,
			4,
			&incoming,
			&outgoing,
			&reservations,
			&top,
			&|| false,
			&|| panic!("no stop expected"),
		);

		// stale entry survived, incoming appended after it
		assert_eq!(reservations.size(), 2);
		assert_eq!(tail_entry(&reservations), Some((incoming[0].hash(), 5)));
	}

	#[test]
	fn empty_incoming_changes_nothing() {
		let (reservations, top) = fixture();
		reservations.push_back(header(1).hash(), 1);
		let before = top.read().candidate;

		let keep = handle_reindexed(
			None,
			0,
			&[],
			&[header(2)],
			&reservations,
			&top,
			&|| false,
			&|| panic!("no stop expected"),
		);

		assert!(keep);
		assert_eq!(reservations.size(), 1);
		assert_eq!(top.read().candidate.hash, before.hash);
	}

	#[test]
	fn service_stopped_unsubscribes_quietly() {
		let (reservations, top) = fixture();
		let keep = handle_reindexed(
			Some(ErrorKind::ServiceStopped),
			0,
			&[header(1)],
			&[],
			&reservations,
			&top,
			&|| false,
			&|| panic!("service_stopped must not initiate a stop"),
		);
		assert!(!keep);
		assert_eq!(reservations.size(), 0);
	}

	#[test]
	fn reorg_error_initiates_stop_and_unsubscribes() {
		let (reservations, top) = fixture();
		let stop_called = AtomicBool::new(false);
		let keep = handle_reindexed(
			Some(ErrorKind::Corrupt("boom".to_owned())),
			0,
			&[header(1)],
			&[],
			&reservations,
			&top,
			&|| false,
			&|| stop_called.store(true, Ordering::SeqCst),
		);
		assert!(!keep);
		assert!(stop_called.load(Ordering::SeqCst));
	}

	#[test]
	fn block_reorg_updates_confirmed_cache_only_with_incoming() {
		let (_, top) = fixture();
		let block = Arc::new(bitnode_core::genesis::genesis_reg());

		let keep = handle_reorganized(
			None,
			100,
			&[block.clone()],
			&[],
			&top,
			&|| false,
			&|| panic!("no stop expected"),
		);
		assert!(keep);
		assert_eq!(top.read().confirmed.height, 101);
		assert_eq!(top.read().confirmed.hash, block.hash());

		// empty incoming keeps the cache where it was
		let keep = handle_reorganized(None, 7, &[], &[], &top, &|| false, &|| ());
		assert!(keep);
		assert_eq!(top.read().confirmed.height, 101);
	}
}
