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

//! Values that should be shared across all modules, without necessarily
//! having to pass them all over the place, but aren't consensus values.
//! should be used sparingly.

use bitnode_util::RwLock;

/// Protocol version we speak and the highest we will negotiate.
pub const PROTOCOL_VERSION: u32 = 70015;

/// User agent advertised in the version handshake.
pub const USER_AGENT: &str = concat!("/bitnode:", env!("CARGO_PKG_VERSION"), "/");

/// Network selection, each with its own genesis, magic bytes and default
/// peer-to-peer port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ChainTypes {
	/// For CI testing
	AutomatedTesting,
	/// Local private network with trivial difficulty
	Regtest,
	/// Public test network
	Testnet,
	/// Main production network
	Mainnet,
}

impl Default for ChainTypes {
	fn default() -> ChainTypes {
		ChainTypes::Mainnet
	}
}

lazy_static! {
	/// The active chain type, set once at startup from config/CLI flags.
	pub static ref CHAIN_TYPE: RwLock<ChainTypes> = RwLock::new(ChainTypes::Mainnet);
}

/// Set the chain type for the process.
pub fn set_chain_type(new_type: ChainTypes) {
	let mut chain_type_ref = CHAIN_TYPE.write();
	*chain_type_ref = new_type;
}

/// The currently active chain type.
pub fn chain_type() -> ChainTypes {
	*CHAIN_TYPE.read()
}

/// Message-start magic bytes for the active network.
pub fn magic() -> [u8; 4] {
	match chain_type() {
		ChainTypes::Mainnet => [0xf9, 0xbe, 0xb4, 0xd9],
		ChainTypes::Testnet => [0x0b, 0x11, 0x09, 0x07],
		ChainTypes::Regtest => [0xfa, 0xbf, 0xb5, 0xda],
		ChainTypes::AutomatedTesting => [0xfa, 0xbf, 0xb5, 0xda],
	}
}

/// Default peer-to-peer listen port for the active network.
pub fn default_p2p_port() -> u16 {
	match chain_type() {
		ChainTypes::Mainnet => 8333,
		ChainTypes::Testnet => 18333,
		ChainTypes::Regtest => 18444,
		ChainTypes::AutomatedTesting => 18445,
	}
}

/// Whether the active chain is one of the test variants.
pub fn is_testing_mode() -> bool {
	match chain_type() {
		ChainTypes::Mainnet => false,
		_ => true,
	}
}
