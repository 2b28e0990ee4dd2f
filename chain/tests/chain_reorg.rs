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

use std::fs;
use std::sync::Arc;

use bitnode_chain::Chain;
use bitnode_core::consensus::REGTEST_GENESIS_BITS;
use bitnode_core::core::block::merkle_root;
use bitnode_core::core::hash::{Hash, Hashed, ZERO_HASH};
use bitnode_core::core::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};
use bitnode_core::genesis;
use bitnode_util::Mutex;

fn clean_output_dir(dir_name: &str) {
	let _ = fs::remove_dir_all(dir_name);
}

fn setup(dir_name: &str) -> Chain {
	clean_output_dir(dir_name);
	let genesis = genesis::genesis_reg();
	Chain::bootstrap(dir_name, &genesis).unwrap();
	let chain = Chain::new(dir_name.to_owned(), genesis);
	chain.start().unwrap();
	chain
}

// Builds a block on the given previous hash with a unique coinbase so
// sibling test blocks at one height get distinct hashes.
fn test_block(prev_hash: Hash, salt: u32) -> Block {
	let txs = vec![Transaction {
		version: 1,
		inputs: vec![TxIn {
			prev_out: OutPoint {
				hash: ZERO_HASH,
				index: u32::max_value(),
			},
			script_sig: salt.to_le_bytes().to_vec(),
			sequence: u32::max_value(),
		}],
		outputs: vec![TxOut {
			value: 50_0000_0000,
			script_pubkey: vec![0x51],
		}],
		lock_time: 0,
	}];
	let header = BlockHeader {
		version: 1,
		prev_hash,
		merkle_root: merkle_root(&txs),
		timestamp: 1296688602 + salt,
		bits: REGTEST_GENESIS_BITS,
		nonce: salt,
	};
	Block { header, txs }
}

// A straight chain of n blocks on top of the given hash.
fn test_chain(mut prev_hash: Hash, n: usize, salt: u32) -> Vec<Block> {
	let mut blocks = vec![];
	for i in 0..n {
		let b = test_block(prev_hash, salt + i as u32);
		prev_hash = b.hash();
		blocks.push(b);
	}
	blocks
}

fn headers_of(blocks: &[Block]) -> Vec<BlockHeader> {
	blocks.iter().map(|b| b.header.clone()).collect()
}

#[test]
fn extend_candidate_with_headers() {
	let chain = setup(".bitnode_extend_candidate");

	let blocks = test_chain(chain.get_top(true).unwrap().hash, 3, 0);
	chain.process_headers(&headers_of(&blocks)).unwrap();

	let candidate = chain.get_top(true).unwrap();
	assert_eq!(candidate.height, 3);
	assert_eq!(candidate.hash, blocks[2].hash());

	// confirmed view untouched until bodies arrive
	let confirmed = chain.get_top(false).unwrap();
	assert_eq!(confirmed.height, 0);

	// all three extension heights are downloadable
	for h in 1..=3 {
		assert_eq!(chain.get_downloadable(h).unwrap(), Some(blocks[h as usize - 1].hash()));
	}
	assert_eq!(chain.get_downloadable(4).unwrap(), None);

	clean_output_dir(".bitnode_extend_candidate");
}

#[test]
fn bodies_advance_confirmed_cursor() {
	let chain = setup(".bitnode_bodies_advance");

	let blocks = test_chain(chain.get_top(true).unwrap().hash, 3, 10);
	chain.process_headers(&headers_of(&blocks)).unwrap();

	let confirmed_events = Arc::new(Mutex::new(vec![]));
	let events = confirmed_events.clone();
	chain.subscribe_blocks(Box::new(move |ec, fork, incoming, _outgoing| {
		assert!(ec.is_none());
		events
			.lock()
			.push((fork, incoming.iter().map(|b| b.hash()).collect::<Vec<_>>()));
		true
	}));

	// deliver out of order: the middle body confirms nothing yet
	chain.process_block(blocks[1].clone()).unwrap();
	assert_eq!(chain.get_top(false).unwrap().height, 0);

	// the first body confirms heights 1 and 2 in one move
	chain.process_block(blocks[0].clone()).unwrap();
	assert_eq!(chain.get_top(false).unwrap().height, 2);

	chain.process_block(blocks[2].clone()).unwrap();
	assert_eq!(chain.get_top(false).unwrap().height, 3);
	assert_eq!(chain.top_valid_candidate_state().unwrap().height, 3);

	let events = confirmed_events.lock();
	assert_eq!(events.len(), 2);
	assert_eq!(events[0].0, 0);
	assert_eq!(events[0].1, vec![blocks[0].hash(), blocks[1].hash()]);
	assert_eq!(events[1].0, 2);
	assert_eq!(events[1].1, vec![blocks[2].hash()]);

	clean_output_dir(".bitnode_bodies_advance");
}

#[test]
fn competing_branch_reorganizes_candidate() {
	let chain = setup(".bitnode_competing_branch");
	let gen_hash = chain.get_top(true).unwrap().hash;

	// candidate up to height 2
	let original = test_chain(gen_hash, 2, 100);
	chain.process_headers(&headers_of(&original)).unwrap();

	let header_events = Arc::new(Mutex::new(vec![]));
	let events = header_events.clone();
	chain.subscribe_headers(Box::new(move |ec, fork, incoming, outgoing| {
		assert!(ec.is_none());
		events.lock().push((
			fork,
			incoming.iter().map(|h| h.hash()).collect::<Vec<_>>(),
			outgoing.iter().map(|h| h.hash()).collect::<Vec<_>>(),
		));
		true
	}));

	// competing branch from genesis, longer, so more work
	let competing = test_chain(gen_hash, 3, 200);
	chain.process_headers(&headers_of(&competing)).unwrap();

	let candidate = chain.get_top(true).unwrap();
	assert_eq!(candidate.height, 3);
	assert_eq!(candidate.hash, competing[2].hash());

	let events = header_events.lock();
	assert_eq!(events.len(), 1);
	let (fork, ref incoming, ref outgoing) = events[0];
	assert_eq!(fork, 0);
	assert_eq!(
		incoming,
		&competing.iter().map(|b| b.hash()).collect::<Vec<_>>()
	);
	assert_eq!(
		outgoing,
		&original.iter().map(|b| b.hash()).collect::<Vec<_>>()
	);

	clean_output_dir(".bitnode_competing_branch");
}

#[test]
fn losing_branch_is_parked_not_adopted() {
	let chain = setup(".bitnode_losing_branch");
	let gen_hash = chain.get_top(true).unwrap().hash;

	let original = test_chain(gen_hash, 3, 300);
	chain.process_headers(&headers_of(&original)).unwrap();

	// shorter competitor carries less work, candidate must not move
	let competing = test_chain(gen_hash, 1, 400);
	chain.process_headers(&headers_of(&competing)).unwrap();

	assert_eq!(chain.get_top(true).unwrap().hash, original[2].hash());

	// but once extended past the original it wins, reorging from genesis
	let extension = test_chain(competing[0].hash(), 3, 500);
	chain.process_headers(&headers_of(&extension)).unwrap();

	let candidate = chain.get_top(true).unwrap();
	assert_eq!(candidate.height, 4);
	assert_eq!(candidate.hash, extension[2].hash());

	clean_output_dir(".bitnode_losing_branch");
}

#[test]
fn reorg_below_confirmed_rolls_back_blocks() {
	let chain = setup(".bitnode_confirmed_rollback");
	let gen_hash = chain.get_top(true).unwrap().hash;

	// fully confirm two blocks
	let original = test_chain(gen_hash, 2, 600);
	chain.process_headers(&headers_of(&original)).unwrap();
	chain.process_block(original[0].clone()).unwrap();
	chain.process_block(original[1].clone()).unwrap();
	assert_eq!(chain.get_top(false).unwrap().height, 2);

	let block_events = Arc::new(Mutex::new(vec![]));
	let events = block_events.clone();
	chain.subscribe_blocks(Box::new(move |ec, fork, incoming, outgoing| {
		assert!(ec.is_none());
		events
			.lock()
			.push((fork, incoming.len(), outgoing.len()));
		true
	}));

	// competing branch from genesis wins on work
	let competing = test_chain(gen_hash, 3, 700);
	chain.process_headers(&headers_of(&competing)).unwrap();

	// confirmed rolled back to the fork, both old bodies outgoing
	assert_eq!(chain.get_top(false).unwrap().height, 0);
	assert_eq!(chain.top_valid_candidate_state().unwrap().height, 0);
	{
		let events = block_events.lock();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0], (0, 0, 2));
	}

	// new branch bodies reconfirm from the fork
	for b in &competing {
		chain.process_block(b.clone()).unwrap();
	}
	assert_eq!(chain.get_top(false).unwrap().height, 3);

	clean_output_dir(".bitnode_confirmed_rollback");
}

#[test]
fn duplicate_headers_are_quietly_ignored() {
	let chain = setup(".bitnode_duplicate_headers");

	let blocks = test_chain(chain.get_top(true).unwrap().hash, 2, 800);
	chain.process_headers(&headers_of(&blocks)).unwrap();

	let fired = Arc::new(Mutex::new(0u32));
	let counter = fired.clone();
	chain.subscribe_headers(Box::new(move |_, _, _, _| {
		*counter.lock() += 1;
		true
	}));

	chain.process_headers(&headers_of(&blocks)).unwrap();
	assert_eq!(*fired.lock(), 0);
	assert_eq!(chain.get_top(true).unwrap().height, 2);

	clean_output_dir(".bitnode_duplicate_headers");
}

#[test]
fn block_with_bad_merkle_root_rejected() {
	let chain = setup(".bitnode_bad_merkle");

	let mut block = test_block(chain.get_top(true).unwrap().hash, 900);
	block.header.merkle_root = ZERO_HASH;
	assert!(chain.process_block(block).is_err());

	clean_output_dir(".bitnode_bad_merkle");
}
