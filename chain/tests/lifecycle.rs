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

use bitnode_chain::{Chain, ErrorKind};
use bitnode_core::genesis;
use bitnode_util::Mutex;

fn clean_output_dir(dir_name: &str) {
	let _ = fs::remove_dir_all(dir_name);
}

#[test]
fn start_requires_initchain() {
	let dir = ".bitnode_start_requires_init";
	clean_output_dir(dir);

	let chain = Chain::new(dir.to_owned(), genesis::genesis_reg());
	match chain.start() {
		Err(e) => assert_eq!(e.kind(), ErrorKind::GenesisBlockRequired),
		Ok(_) => panic!("start must fail on an uninitialized directory"),
	}

	clean_output_dir(dir);
}

#[test]
fn cold_start_tops_are_genesis() {
	let dir = ".bitnode_cold_start";
	clean_output_dir(dir);

	let genesis = genesis::genesis_reg();
	Chain::bootstrap(dir, &genesis).unwrap();
	let chain = Chain::new(dir.to_owned(), genesis.clone());
	chain.start().unwrap();

	let confirmed = chain.get_top(false).unwrap();
	let candidate = chain.get_top(true).unwrap();
	assert_eq!(confirmed.height, 0);
	assert_eq!(candidate.height, 0);
	assert_eq!(confirmed.hash, genesis.hash());
	assert_eq!(candidate.hash, genesis.hash());
	assert_eq!(chain.top_valid_candidate_state().unwrap().height, 0);
	assert_eq!(chain.get_downloadable(0).unwrap(), None);

	clean_output_dir(dir);
}

#[test]
fn bootstrap_is_idempotent_but_network_bound() {
	let dir = ".bitnode_bootstrap_idempotent";
	clean_output_dir(dir);

	let reg = genesis::genesis_reg();
	Chain::bootstrap(dir, &reg).unwrap();
	Chain::bootstrap(dir, &reg).unwrap();

	// a directory initialized for regtest refuses a mainnet node
	let chain = Chain::new(dir.to_owned(), genesis::genesis_main());
	match chain.start() {
		Err(e) => match e.kind() {
			ErrorKind::GenesisMismatch { .. } => (),
			k => panic!("expected GenesisMismatch, got {:?}", k),
		},
		Ok(_) => panic!("start must fail on a genesis mismatch"),
	}

	clean_output_dir(dir);
}

#[test]
fn stop_notifies_subscribers_once() {
	let dir = ".bitnode_stop_notifies";
	clean_output_dir(dir);

	let genesis = genesis::genesis_reg();
	Chain::bootstrap(dir, &genesis).unwrap();
	let chain = Chain::new(dir.to_owned(), genesis);
	chain.start().unwrap();

	let seen = Arc::new(Mutex::new(vec![]));
	let log = seen.clone();
	chain.subscribe_headers(Box::new(move |ec, _, _, _| {
		log.lock().push(ec);
		// stay subscribed; the stop path must still drop us
		true
	}));

	chain.stop().unwrap();
	chain.stop().unwrap();
	chain.close().unwrap();

	let seen = seen.lock();
	assert_eq!(seen.len(), 1);
	assert_eq!(seen[0], Some(ErrorKind::ServiceStopped));

	clean_output_dir(dir);
}

#[test]
fn subscribing_after_stop_notifies_immediately() {
	let dir = ".bitnode_sub_after_stop";
	clean_output_dir(dir);

	let genesis = genesis::genesis_reg();
	Chain::bootstrap(dir, &genesis).unwrap();
	let chain = Chain::new(dir.to_owned(), genesis);
	chain.start().unwrap();
	chain.stop().unwrap();

	let seen = Arc::new(Mutex::new(vec![]));
	let log = seen.clone();
	chain.subscribe_headers(Box::new(move |ec, _, _, _| {
		log.lock().push(ec);
		false
	}));

	let seen = seen.lock();
	assert_eq!(seen.len(), 1);
	assert_eq!(seen[0], Some(ErrorKind::ServiceStopped));

	clean_output_dir(dir);
}

#[test]
fn transactions_reach_subscribers_once() {
	let dir = ".bitnode_tx_subscribers";
	clean_output_dir(dir);

	let genesis = genesis::genesis_reg();
	Chain::bootstrap(dir, &genesis).unwrap();
	let chain = Chain::new(dir.to_owned(), genesis.clone());
	chain.start().unwrap();

	let seen = Arc::new(Mutex::new(0u32));
	let counter = seen.clone();
	chain.subscribe_transactions(Box::new(move |ec, _| {
		assert!(ec.is_none());
		*counter.lock() += 1;
		true
	}));

	let tx = genesis.txs[0].clone();
	chain.process_transaction(tx.clone()).unwrap();
	// a duplicate is absorbed by the pool without an event
	chain.process_transaction(tx).unwrap();

	assert_eq!(*seen.lock(), 1);

	clean_output_dir(dir);
}

#[test]
fn operations_after_stop_fail_stopped() {
	let dir = ".bitnode_ops_after_stop";
	clean_output_dir(dir);

	let genesis = genesis::genesis_reg();
	Chain::bootstrap(dir, &genesis).unwrap();
	let chain = Chain::new(dir.to_owned(), genesis.clone());
	chain.start().unwrap();
	chain.stop().unwrap();

	let err = chain
		.process_headers(&[genesis.header.clone()])
		.err()
		.expect("stopped chain must reject headers");
	assert_eq!(err.kind(), ErrorKind::ServiceStopped);

	clean_output_dir(dir);
}
