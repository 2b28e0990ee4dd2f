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

//! Node types

use std::convert::From;
use std::io;

use bitnode_chain as chain;
use bitnode_core::global::ChainTypes;
use bitnode_p2p as p2p;

/// Error type wrapping underlying module errors.
#[derive(Debug, Fail)]
pub enum Error {
	/// Generic startup or ordering violation. Surfaced, never retried.
	#[fail(display = "Operation failed: {}", _0)]
	OperationFailed(String),
	/// The lifecycle has entered stopping.
	#[fail(display = "Service stopped")]
	ServiceStopped,
	/// A database invariant is broken; the node refuses to run.
	#[fail(display = "Chain corrupt: {}", _0)]
	ChainCorrupt(String),
	/// Error originating from the blockchain implementation.
	#[fail(display = "Chain error: {}", _0)]
	Chain(chain::Error),
	/// Error originating from the peer-to-peer network.
	#[fail(display = "P2P error: {:?}", _0)]
	P2P(p2p::Error),
	/// Invalid configuration detected at composition time.
	#[fail(display = "Configuration error: {}", _0)]
	Configuration(String),
	/// IO error during node composition (lock file, directories).
	#[fail(display = "IO error: {}", _0)]
	IOErr(String),
}

impl From<chain::Error> for Error {
	fn from(e: chain::Error) -> Error {
		Error::Chain(e)
	}
}

impl From<p2p::Error> for Error {
	fn from(e: p2p::Error) -> Error {
		Error::P2P(e)
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOErr(format!("{}", e))
	}
}

fn default_minimum_connections() -> u32 {
	2
}

fn default_maximum_deviation() -> f64 {
	1.5
}

fn default_block_latency_seconds() -> u64 {
	60
}

/// Full node configuration, aggregating the settings the coordination
/// layer consumes directly with the configurations of its components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
	/// Directory under which the chain store lives
	pub db_root: String,

	/// Whether to maintain an address index. Unsupported by this node
	/// class, always forced off.
	#[serde(default)]
	pub index_addresses: bool,

	/// Setup the node for mainnet, testnet or regtest
	#[serde(default)]
	pub chain_type: ChainTypes,

	/// Lower bound on download sessions before the slow-peer policy kicks
	/// in; with a smaller cohort a deviation from the mean says nothing.
	#[serde(default = "default_minimum_connections")]
	pub minimum_connections: u32,

	/// Ratio by which a peer may lag the cohort mean download rate before
	/// its reservation is taken away.
	#[serde(default = "default_maximum_deviation")]
	pub maximum_deviation: f64,

	/// Nominal per-block download deadline.
	#[serde(default = "default_block_latency_seconds")]
	pub block_latency_seconds: u64,

	/// Configuration for the peer-to-peer server
	#[serde(default)]
	pub p2p_config: p2p::P2PConfig,
}

impl Default for NodeConfig {
	fn default() -> NodeConfig {
		NodeConfig {
			db_root: ".bitnode".to_string(),
			index_addresses: false,
			chain_type: ChainTypes::default(),
			minimum_connections: default_minimum_connections(),
			maximum_deviation: default_maximum_deviation(),
			block_latency_seconds: default_block_latency_seconds(),
			p2p_config: p2p::P2PConfig::default(),
		}
	}
}
