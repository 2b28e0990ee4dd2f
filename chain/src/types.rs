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

//! Base types the chain engine exposes to its consumers.

use std::fmt;
use std::sync::Arc;

use bitnode_core::core::hash::Hash;
use bitnode_core::core::{Block, BlockHeader, Transaction};

use crate::error::ErrorKind;

/// The tip of a chain view: one block position, identified by hash and
/// height. Used both for the confirmed chain and the candidate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
	/// Hash of the block at the tip
	pub hash: Hash,
	/// Height of the tip
	pub height: u64,
}

impl Tip {
	/// A tip at height zero on the provided genesis hash.
	pub fn new(genesis_hash: Hash) -> Tip {
		Tip {
			hash: genesis_hash,
			height: 0,
		}
	}
}

impl fmt::Display for Tip {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} at {}", self.hash, self.height)
	}
}

/// Handler invoked on every header-chain reorganization with the error
/// condition (None on success), the fork height, the incoming headers in
/// ascending order and the outgoing headers in ascending order. Returns
/// true to stay subscribed, false to unsubscribe.
pub type HeaderHandler =
	Box<dyn Fn(Option<ErrorKind>, u64, &[Arc<BlockHeader>], &[Arc<BlockHeader>]) -> bool + Send>;

/// Handler invoked on every block-chain reorganization; same contract as
/// `HeaderHandler` with full blocks.
pub type BlockHandler =
	Box<dyn Fn(Option<ErrorKind>, u64, &[Arc<Block>], &[Arc<Block>]) -> bool + Send>;

/// Handler invoked on every transaction accepted to the memory pool.
pub type TxHandler = Box<dyn Fn(Option<ErrorKind>, &Transaction) -> bool + Send>;
