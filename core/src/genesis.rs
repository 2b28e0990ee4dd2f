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

//! Definition of the genesis block of each network. Placed here to avoid
//! dependency on the chain crate.

use crate::consensus::{GENESIS_BITS, REGTEST_GENESIS_BITS};
use crate::core::block::{merkle_root, Block, BlockHeader};
use crate::core::hash::ZERO_HASH;
use crate::core::transaction::{OutPoint, Transaction, TxIn, TxOut};
use crate::global::{self, ChainTypes};

// "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks",
// prefixed with the difficulty target and height push the original miner used.
const COINBASE_SIG: &str = "04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73";

// Pays the 50 BTC subsidy to the original public key.
const COINBASE_PUBKEY: &str = "4104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac";

fn from_hex(hex: &str) -> Vec<u8> {
	(0..hex.len() / 2)
		.map(|i| u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).expect("valid hex literal"))
		.collect()
}

fn genesis_coinbase() -> Transaction {
	Transaction {
		version: 1,
		inputs: vec![TxIn {
			prev_out: OutPoint {
				hash: ZERO_HASH,
				index: u32::max_value(),
			},
			script_sig: from_hex(COINBASE_SIG),
			sequence: u32::max_value(),
		}],
		outputs: vec![TxOut {
			value: 50_0000_0000,
			script_pubkey: from_hex(COINBASE_PUBKEY),
		}],
		lock_time: 0,
	}
}

fn genesis_block(timestamp: u32, bits: u32, nonce: u32) -> Block {
	let txs = vec![genesis_coinbase()];
	let header = BlockHeader {
		version: 1,
		prev_hash: ZERO_HASH,
		merkle_root: merkle_root(&txs),
		timestamp,
		bits,
		nonce,
	};
	Block { header, txs }
}

/// The mainnet genesis block, mined 2009-01-03.
pub fn genesis_main() -> Block {
	genesis_block(1231006505, GENESIS_BITS, 2083236893)
}

/// The testnet genesis block.
pub fn genesis_test() -> Block {
	genesis_block(1296688602, GENESIS_BITS, 414098458)
}

/// The regtest genesis block, trivial difficulty.
pub fn genesis_reg() -> Block {
	genesis_block(1296688602, REGTEST_GENESIS_BITS, 2)
}

/// The genesis block of the currently selected network.
pub fn genesis() -> Block {
	match global::chain_type() {
		ChainTypes::Mainnet => genesis_main(),
		ChainTypes::Testnet => genesis_test(),
		ChainTypes::Regtest | ChainTypes::AutomatedTesting => genesis_reg(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::hash::Hashed;

	#[test]
	fn mainnet_genesis_hash() {
		let gen = genesis_main();
		assert_eq!(
			format!("{}", gen.header.hash()),
			"000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
		);
		assert_eq!(
			format!("{}", gen.header.merkle_root),
			"4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
		);
	}

	#[test]
	fn testnet_genesis_hash() {
		let gen = genesis_test();
		assert_eq!(
			format!("{}", gen.header.hash()),
			"000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943"
		);
	}

	#[test]
	fn regtest_genesis_hash() {
		let gen = genesis_reg();
		assert_eq!(
			format!("{}", gen.header.hash()),
			"0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
		);
	}

	#[test]
	fn genesis_merkle_commitment_holds() {
		assert!(genesis_main().verify_merkle_root());
		assert!(genesis_reg().verify_merkle_root());
	}
}
