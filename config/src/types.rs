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

//! Public types for config modules

use std::fmt;
use std::io;
use std::path::PathBuf;

use bitnode_core::global::ChainTypes;
use bitnode_node::NodeConfig;
use bitnode_p2p::P2PConfig;
use bitnode_util::LoggingConfig;

/// Error type wrapping config errors.
#[derive(Debug)]
pub enum ConfigError {
	/// Error with parsing of config file
	ParseError(String, String),

	/// Error with fileIO while reading config file
	FileIOError(String, String),

	/// No file found
	FileNotFoundError(String),

	/// Error serializing config values
	SerializationError(String),
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			ConfigError::ParseError(ref file_name, ref message) => write!(
				f,
				"Error parsing configuration file at {} - {}",
				file_name, message
			),
			ConfigError::FileIOError(ref file_name, ref message) => {
				write!(f, "{} {}", message, file_name)
			}
			ConfigError::FileNotFoundError(ref file_name) => {
				write!(f, "Configuration file not found: {}", file_name)
			}
			ConfigError::SerializationError(ref message) => {
				write!(f, "Error serializing configuration: {}", message)
			}
		}
	}
}

impl From<io::Error> for ConfigError {
	fn from(error: io::Error) -> ConfigError {
		ConfigError::FileIOError(
			String::from(""),
			format!("Error loading config file: {}", error),
		)
	}
}

/// The `[node]` section: settings the coordination layer consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
	/// Lower bound on download sessions before the slow-peer policy
	/// applies
	pub minimum_connections: u32,
	/// Allowed lag ratio against the cohort mean download rate
	pub maximum_deviation: f64,
	/// Nominal per-block download deadline in seconds
	pub block_latency_seconds: u64,
}

impl Default for NodeSection {
	fn default() -> NodeSection {
		let defaults = NodeConfig::default();
		NodeSection {
			minimum_connections: defaults.minimum_connections,
			maximum_deviation: defaults.maximum_deviation,
			block_latency_seconds: defaults.block_latency_seconds,
		}
	}
}

/// The `[blockchain]` section. The in-memory chain engine currently has
/// no tuning knobs; the section is recognized so files carrying it parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockchainSection {}

/// The `[database]` section: where and how the chain store keeps data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSection {
	/// Directory under which the chain store lives
	pub directory: String,
	/// Whether to maintain an address index; unsupported by this node
	/// class and forced off
	pub index_addresses: bool,
}

impl Default for DatabaseSection {
	fn default() -> DatabaseSection {
		DatabaseSection {
			directory: ".bitnode".to_owned(),
			index_addresses: false,
		}
	}
}

/// The `[bitcoin]` section: which Bitcoin network the node joins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BitcoinSection {
	/// mainnet, testnet or regtest
	pub network: ChainTypes,
}

impl Default for BitcoinSection {
	fn default() -> BitcoinSection {
		BitcoinSection {
			network: ChainTypes::default(),
		}
	}
}

/// Going to hold all of the various configuration types separately, then
/// put them together as a single NodeConfig object afterwards. This is to
/// flatten out the configuration file into logical sections, as they tend
/// to be quite nested in the code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigMembers {
	/// Coordination settings
	#[serde(default)]
	pub node: NodeSection,
	/// Chain engine settings
	#[serde(default)]
	pub blockchain: BlockchainSection,
	/// Store settings
	#[serde(default)]
	pub database: DatabaseSection,
	/// Peer-to-peer settings
	#[serde(default)]
	pub network: P2PConfig,
	/// Network selection
	#[serde(default)]
	pub bitcoin: BitcoinSection,
	/// Logging settings
	#[serde(default)]
	pub logging: Option<LoggingConfig>,
}

impl Default for ConfigMembers {
	fn default() -> ConfigMembers {
		ConfigMembers {
			node: NodeSection::default(),
			blockchain: BlockchainSection::default(),
			database: DatabaseSection::default(),
			network: P2PConfig::default(),
			bitcoin: BitcoinSection::default(),
			logging: Some(LoggingConfig::default()),
		}
	}
}

impl ConfigMembers {
	/// Assembles the node configuration the coordination crate consumes
	/// out of the file's sections.
	pub fn node_config(&self) -> NodeConfig {
		NodeConfig {
			db_root: self.database.directory.clone(),
			index_addresses: self.database.index_addresses,
			chain_type: self.bitcoin.network,
			minimum_connections: self.node.minimum_connections,
			maximum_deviation: self.node.maximum_deviation,
			block_latency_seconds: self.node.block_latency_seconds,
			p2p_config: self.network.clone(),
		}
	}
}

/// Going to hold all of the various configuration types separately for
/// now, then put them together as a single NodeConfig object afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
	/// Keep track of the file we've read
	pub config_file_path: Option<PathBuf>,
	/// Keep track of whether we're using a config file or just the
	/// defaults for each member
	pub using_config_file: bool,
	/// Global member config
	pub members: Option<ConfigMembers>,
}
