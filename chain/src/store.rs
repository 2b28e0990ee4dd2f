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

//! Backing store for the chain engine. Holds the candidate header index
//! (the chain the node is trying to download), every block body received so
//! far, and side headers that may become a better branch later. The store
//! keeps no opinion on reorganizations; the chain decides, the store moves
//! entries around.
//!
//! Persistence is limited to a genesis marker under the database directory;
//! the marker is how an existing directory is matched against the network
//! the node was configured for.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitnode_core::consensus::work_from_bits;
use bitnode_core::core::hash::{Hash, Hashed};
use bitnode_core::core::{Block, BlockHeader};

use crate::error::{Error, ErrorKind};
use crate::types::Tip;

const GENESIS_MARKER: &str = "genesis";

/// One position of the candidate index.
pub struct IndexEntry {
	/// Header hash, cached
	pub hash: Hash,
	/// The header itself
	pub header: Arc<BlockHeader>,
	/// Work accumulated from genesis up to and including this header
	pub total_work: u128,
}

/// The dual-index store: candidate headers by height, bodies by hash, plus
/// the fork-header pool and the confirmed cursor (`top_valid`).
pub struct ChainStore {
	candidate: Vec<IndexEntry>,
	candidate_hashes: HashMap<Hash, u64>,
	forks: HashMap<Hash, Arc<BlockHeader>>,
	bodies: HashMap<Hash, Arc<Block>>,
	top_valid: u64,
}

impl ChainStore {
	/// Creates the database directory and writes the genesis marker for the
	/// provided network genesis. Fails if a marker for a different genesis
	/// is already present.
	pub fn bootstrap(db_root: &str, genesis: &Block) -> Result<(), Error> {
		let path = Path::new(db_root);
		fs::create_dir_all(path)?;
		let marker = path.join(GENESIS_MARKER);
		let gen_hash = genesis.hash();
		if marker.exists() {
			let stored = read_marker(&marker)?;
			if stored != gen_hash {
				return Err(ErrorKind::GenesisMismatch {
					stored,
					ours: gen_hash,
				}
				.into());
			}
			return Ok(());
		}
		fs::write(&marker, format!("{}\n", gen_hash))?;
		info!("Wrote genesis {} under {}", gen_hash, db_root);
		Ok(())
	}

	/// Opens the store under an initialized database directory, verifying
	/// the genesis marker against the configured network.
	pub fn open(db_root: &str, genesis: &Block) -> Result<ChainStore, Error> {
		let marker = PathBuf::from(db_root).join(GENESIS_MARKER);
		if !marker.exists() {
			return Err(ErrorKind::GenesisBlockRequired.into());
		}
		let stored = read_marker(&marker)?;
		let gen_hash = genesis.hash();
		if stored != gen_hash {
			return Err(ErrorKind::GenesisMismatch {
				stored,
				ours: gen_hash,
			}
			.into());
		}

		let gen_header = Arc::new(genesis.header.clone());
		let mut candidate_hashes = HashMap::new();
		candidate_hashes.insert(gen_hash, 0);
		let mut bodies = HashMap::new();
		bodies.insert(gen_hash, Arc::new(genesis.clone()));

		Ok(ChainStore {
			candidate: vec![IndexEntry {
				hash: gen_hash,
				header: gen_header,
				total_work: work_from_bits(genesis.header.bits),
			}],
			candidate_hashes,
			forks: HashMap::new(),
			bodies,
			top_valid: 0,
		})
	}

	/// Tip of the candidate header chain.
	pub fn candidate_tip(&self) -> Tip {
		let entry = self.candidate.last().expect("genesis always present");
		Tip {
			hash: entry.hash,
			height: self.candidate.len() as u64 - 1,
		}
	}

	/// Tip of the confirmed chain: the highest candidate position whose
	/// body (and every body below it) has been stored.
	pub fn confirmed_tip(&self) -> Tip {
		let entry = &self.candidate[self.top_valid as usize];
		Tip {
			hash: entry.hash,
			height: self.top_valid,
		}
	}

	/// Height of the confirmed cursor.
	pub fn top_valid(&self) -> u64 {
		self.top_valid
	}

	/// Resets the confirmed cursor, only ever downward (reorg truncation).
	pub fn set_top_valid(&mut self, height: u64) {
		debug_assert!(height <= self.top_valid);
		self.top_valid = height;
	}

	/// Work accumulated on the candidate chain up to the given height.
	pub fn work_at(&self, height: u64) -> u128 {
		self.candidate[height as usize].total_work
	}

	/// Work accumulated on the whole candidate chain.
	pub fn total_work(&self) -> u128 {
		self.candidate.last().expect("genesis always present").total_work
	}

	/// Height of a candidate header, if the hash is on the candidate chain.
	pub fn candidate_height(&self, hash: &Hash) -> Option<u64> {
		self.candidate_hashes.get(hash).cloned()
	}

	/// Candidate entry at the given height.
	pub fn entry_at(&self, height: u64) -> Option<&IndexEntry> {
		self.candidate.get(height as usize)
	}

	/// A header from the fork pool.
	pub fn fork_header(&self, hash: &Hash) -> Option<Arc<BlockHeader>> {
		self.forks.get(hash).cloned()
	}

	/// Stashes a header in the fork pool.
	pub fn add_fork_header(&mut self, header: Arc<BlockHeader>) {
		self.forks.insert(header.hash(), header);
	}

	/// Whether we know the header at all, on the candidate chain or the
	/// fork pool.
	pub fn header_known(&self, hash: &Hash) -> bool {
		self.candidate_hashes.contains_key(hash) || self.forks.contains_key(hash)
	}

	/// Whether a body has been stored for the hash.
	pub fn has_body(&self, hash: &Hash) -> bool {
		self.bodies.contains_key(hash)
	}

	/// A stored body.
	pub fn body(&self, hash: &Hash) -> Option<Arc<Block>> {
		self.bodies.get(hash).cloned()
	}

	/// Stores a body.
	pub fn store_body(&mut self, block: Arc<Block>) {
		self.bodies.insert(block.hash(), block);
	}

	/// Removes every candidate entry above the fork height and returns them
	/// in ascending order; their headers move to the fork pool so the old
	/// branch can compete again later.
	pub fn truncate_candidate(&mut self, fork_height: u64) -> Vec<IndexEntry> {
		let removed: Vec<IndexEntry> = self.candidate.split_off(fork_height as usize + 1);
		for entry in &removed {
			self.candidate_hashes.remove(&entry.hash);
			self.forks.insert(entry.hash, entry.header.clone());
		}
		removed
	}

	/// Appends a header at the candidate tip, which its prev_hash must
	/// extend, and drops it from the fork pool if it was parked there.
	pub fn append_candidate(&mut self, header: Arc<BlockHeader>) {
		let hash = header.hash();
		debug_assert_eq!(header.prev_hash, self.candidate_tip().hash);
		let total_work = self.total_work() + work_from_bits(header.bits);
		self.forks.remove(&hash);
		self.candidate_hashes.insert(hash, self.candidate.len() as u64);
		self.candidate.push(IndexEntry {
			hash,
			header,
			total_work,
		});
	}

	/// Advances the confirmed cursor over every contiguous stored body and
	/// returns the bodies confirmed by the move, in ascending order.
	pub fn advance_top_valid(&mut self) -> Vec<Arc<Block>> {
		let mut confirmed = vec![];
		while let Some(entry) = self.candidate.get(self.top_valid as usize + 1) {
			match self.bodies.get(&entry.hash) {
				Some(body) => {
					confirmed.push(body.clone());
					self.top_valid += 1;
				}
				None => break,
			}
		}
		confirmed
	}
}

fn read_marker(path: &Path) -> Result<Hash, Error> {
	let content = fs::read_to_string(path)?;
	let hex = content.trim();
	Hash::from_hex(hex)
		.map_err(|_| ErrorKind::Corrupt(format!("unreadable genesis marker {:?}", path)).into())
}
