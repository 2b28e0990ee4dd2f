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

use bitnode_chain::Chain;
use bitnode_core::consensus::REGTEST_GENESIS_BITS;
use bitnode_core::core::block::merkle_root;
use bitnode_core::core::hash::{Hash, ZERO_HASH};
use bitnode_core::core::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};
use bitnode_core::genesis;
use bitnode_core::global::ChainTypes;
use bitnode_node::{Error, FullNode, NodeConfig, NodeState};
use bitnode_p2p::P2PConfig;

fn clean_output_dir(dir_name: &str) {
	let _ = fs::remove_dir_all(dir_name);
}

fn test_config(dir_name: &str, port: u16) -> NodeConfig {
	NodeConfig {
		db_root: dir_name.to_owned(),
		chain_type: ChainTypes::AutomatedTesting,
		p2p_config: P2PConfig {
			host: "127.0.0.1".parse().unwrap(),
			port,
			..P2PConfig::default()
		},
		..NodeConfig::default()
	}
}

fn init_chain_dir(dir_name: &str) {
	clean_output_dir(dir_name);
	Chain::bootstrap(dir_name, &genesis::genesis_reg()).unwrap();
}

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

fn test_chain_on(mut prev_hash: Hash, n: usize, salt: u32) -> Vec<Block> {
	let mut blocks = vec![];
	for i in 0..n {
		let b = test_block(prev_hash, salt + i as u32);
		prev_hash = b.hash();
		blocks.push(b);
	}
	blocks
}

#[test]
fn lifecycle_start_run_stop_close() {
	let dir = ".bitnode_node_lifecycle";
	init_chain_dir(dir);

	let node = FullNode::new(test_config(dir, 19841)).unwrap();
	assert_eq!(node.state(), NodeState::Unstarted);

	node.start().unwrap();
	assert_eq!(node.state(), NodeState::Started);

	node.run().unwrap();
	assert_eq!(node.state(), NodeState::Running);
	assert!(!node.stopped());

	// cold start on a fresh chain seeds nothing (candidate == top_valid)
	assert_eq!(node.reservations().size(), 0);
	let top = node.chain_top();
	assert_eq!(top.confirmed.height, 0);
	assert_eq!(top.candidate.height, 0);

	node.stop().unwrap();
	assert!(node.stopped());
	assert_eq!(node.state(), NodeState::Stopped);

	// stop is idempotent on the stopped side
	node.stop().unwrap();

	node.close().unwrap();
	assert_eq!(node.state(), NodeState::Closed);

	clean_output_dir(dir);
}

#[test]
fn close_without_prior_start_succeeds() {
	let dir = ".bitnode_node_close_cold";
	init_chain_dir(dir);

	let node = FullNode::new(test_config(dir, 19842)).unwrap();
	node.close().unwrap();
	assert_eq!(node.state(), NodeState::Closed);

	clean_output_dir(dir);
}

#[test]
fn start_is_single_shot() {
	let dir = ".bitnode_node_single_start";
	init_chain_dir(dir);

	let node = FullNode::new(test_config(dir, 19843)).unwrap();
	node.start().unwrap();
	match node.start() {
		Err(Error::OperationFailed(_)) => (),
		other => panic!("expected OperationFailed, got {:?}", other),
	}

	node.stop().unwrap();
	node.close().unwrap();
	clean_output_dir(dir);
}

#[test]
fn run_requires_started() {
	let dir = ".bitnode_node_run_unstarted";
	init_chain_dir(dir);

	let node = FullNode::new(test_config(dir, 19844)).unwrap();
	match node.run() {
		Err(Error::ServiceStopped) => (),
		other => panic!("expected ServiceStopped, got {:?}", other),
	}

	node.close().unwrap();
	clean_output_dir(dir);
}

#[test]
fn start_without_initchain_fails() {
	let dir = ".bitnode_node_no_initchain";
	clean_output_dir(dir);

	// directory exists (the lock file needs it) but carries no genesis
	let node = FullNode::new(test_config(dir, 19845)).unwrap();
	match node.start() {
		Err(Error::OperationFailed(_)) => (),
		other => panic!("expected OperationFailed, got {:?}", other),
	}
	assert_eq!(node.state(), NodeState::Unstarted);

	clean_output_dir(dir);
}

#[test]
fn run_seeds_reservations_from_candidate_chain() {
	let dir = ".bitnode_node_seeding";
	init_chain_dir(dir);

	let node = FullNode::new(test_config(dir, 19846)).unwrap();
	node.start().unwrap();

	// grow the candidate chain to height 3 before run
	let blocks = test_chain_on(genesis::genesis_reg().hash(), 3, 40);
	let headers: Vec<BlockHeader> = blocks.iter().map(|b| b.header.clone()).collect();
	node.chain().process_headers(&headers).unwrap();

	node.run().unwrap();

	let reservations = node.reservations();
	assert_eq!(reservations.size(), 3);

	// lowest missing height comes out first
	let first = reservations.get().unwrap();
	assert_eq!(first.height(), 1);
	assert_eq!(first.hash(), blocks[0].hash());

	node.stop().unwrap();
	node.close().unwrap();
	clean_output_dir(dir);
}

#[test]
fn reorg_events_keep_reservations_and_tops_current() {
	let dir = ".bitnode_node_reorg_events";
	init_chain_dir(dir);

	let node = FullNode::new(test_config(dir, 19847)).unwrap();
	node.start().unwrap();
	node.run().unwrap();

	// a header extension arriving over the (simulated) network lands in
	// the queue through the subscribed reindex handler
	let blocks = test_chain_on(genesis::genesis_reg().hash(), 2, 80);
	let headers: Vec<BlockHeader> = blocks.iter().map(|b| b.header.clone()).collect();
	node.chain().process_headers(&headers).unwrap();

	let reservations = node.reservations();
	assert_eq!(reservations.size(), 2);
	assert_eq!(node.chain_top().candidate.height, 2);
	assert_eq!(node.chain_top().candidate.hash, blocks[1].hash());

	// bodies arriving confirm through the block handler
	node.reservations().done(blocks[0].clone()).unwrap();
	node.reservations().done(blocks[1].clone()).unwrap();
	assert_eq!(node.chain_top().confirmed.height, 2);
	assert_eq!(node.chain_top().confirmed.hash, blocks[1].hash());

	node.stop().unwrap();
	node.close().unwrap();
	clean_output_dir(dir);
}

#[test]
fn second_node_on_same_dir_is_locked_out() {
	let dir = ".bitnode_node_lock";
	init_chain_dir(dir);

	let node = FullNode::new(test_config(dir, 19848)).unwrap();
	match FullNode::new(test_config(dir, 19849)) {
		Err(Error::IOErr(_)) => (),
		other => panic!("expected the lock to hold, got {:?}", other.map(|_| ())),
	}

	node.close().unwrap();
	clean_output_dir(dir);
}
