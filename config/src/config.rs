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

//! Configuration file management: discovery in the conventional places,
//! generation of a default file on first run, TOML parsing, and overrides
//! of any key through `BN_`-prefixed environment variables.

use std::env;
use std::fs::{self, File};
use std::io::prelude::*;
use std::path::PathBuf;

use toml::Value;

use crate::types::{ConfigError, ConfigMembers, GlobalConfig};

/// Base name of the configuration file.
pub const SERVER_CONFIG_FILE_NAME: &str = "bitnode-server.toml";

/// Directory under the user's home that holds the node's files.
const NODE_HOME: &str = ".bitnode";

/// Prefix under which any settings key may be overridden from the
/// environment, section and key separated by a double underscore:
/// `BN_NETWORK__OUTBOUND_CONNECTIONS=16`.
const ENV_PREFIX: &str = "BN_";

const ENV_SEPARATOR: &str = "__";

const CONFIG_FILE_HEADER: &str = "# Generated bitnode configuration file.\n\
	 # Every value below may also be set through the environment, e.g.\n\
	 # BN_NETWORK__OUTBOUND_CONNECTIONS=16 overrides [network] outbound_connections.\n\n";

fn check_config_current_dir(path: &str) -> Option<PathBuf> {
	let p = env::current_dir();
	let mut c = match p {
		Ok(c) => c,
		Err(_) => return None,
	};
	c.push(path);
	if c.exists() {
		return Some(c);
	}
	None
}

fn get_node_path() -> Result<PathBuf, ConfigError> {
	let mut node_path = match dirs::home_dir() {
		Some(p) => p,
		None => PathBuf::new(),
	};
	node_path.push(NODE_HOME);
	fs::create_dir_all(node_path.clone())?;
	Ok(node_path)
}

/// Handles setup and detection of paths for the node: use the explicit
/// path when given, an existing file in the current directory or the home
/// directory otherwise, and generate a default file in the home directory
/// when nothing exists yet.
pub fn initial_setup_server(config_path: Option<&str>) -> Result<GlobalConfig, ConfigError> {
	if let Some(path) = config_path {
		return GlobalConfig::new(path);
	}

	if let Some(p) = check_config_current_dir(SERVER_CONFIG_FILE_NAME) {
		let path = p.to_str().ok_or_else(|| {
			ConfigError::FileNotFoundError("invalid unicode in path".to_owned())
		})?;
		return GlobalConfig::new(path);
	}

	let mut path = get_node_path()?;
	path.push(SERVER_CONFIG_FILE_NAME);
	if !path.exists() {
		let default_config = GlobalConfig::default();
		default_config.write_to_file(&path)?;
	}
	let path = path
		.to_str()
		.ok_or_else(|| ConfigError::FileNotFoundError("invalid unicode in path".to_owned()))?;
	GlobalConfig::new(path)
}

impl Default for GlobalConfig {
	fn default() -> GlobalConfig {
		GlobalConfig {
			config_file_path: None,
			using_config_file: false,
			members: Some(ConfigMembers::default()),
		}
	}
}

impl GlobalConfig {
	/// Loads the configuration from the given file, then applies any
	/// environment overrides on top of it.
	pub fn new(file_path: &str) -> Result<GlobalConfig, ConfigError> {
		let mut config = GlobalConfig {
			config_file_path: Some(PathBuf::from(file_path)),
			using_config_file: true,
			members: None,
		};
		config.read()?;
		Ok(config)
	}

	/// The effective configuration as defaults plus environment, when no
	/// file is wanted at all.
	pub fn from_env_only() -> Result<GlobalConfig, ConfigError> {
		let mut config = GlobalConfig::default();
		let value = Value::try_from(ConfigMembers::default())
			.map_err(|e| ConfigError::SerializationError(format!("{}", e)))?;
		config.members = Some(finish_parse(value, "<defaults>")?);
		Ok(config)
	}

	fn file_path_string(&self) -> String {
		self.config_file_path
			.as_ref()
			.map(|p| p.to_string_lossy().into_owned())
			.unwrap_or_else(|| "<none>".to_owned())
	}

	fn read(&mut self) -> Result<(), ConfigError> {
		let path = self.file_path_string();
		let file = File::open(self.config_file_path.as_ref().ok_or_else(|| {
			ConfigError::FileNotFoundError(path.clone())
		})?);
		let mut file = match file {
			Ok(f) => f,
			Err(_) => return Err(ConfigError::FileNotFoundError(path)),
		};
		let mut contents = String::new();
		file.read_to_string(&mut contents)?;

		let value: Value = toml::from_str(&contents)
			.map_err(|e| ConfigError::ParseError(path.clone(), format!("{}", e)))?;
		self.members = Some(finish_parse(value, &path)?);
		Ok(())
	}

	/// Serializes the effective configuration, for `--settings` and for
	/// generating the default file.
	pub fn ser_config(&self) -> Result<String, ConfigError> {
		let members = self
			.members
			.as_ref()
			.ok_or_else(|| ConfigError::SerializationError("no config members".to_owned()))?;
		toml::to_string(members).map_err(|e| ConfigError::SerializationError(format!("{}", e)))
	}

	/// Writes the configuration (with the explanatory header) to a file.
	pub fn write_to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
		let serialized = self.ser_config()?;
		let mut file = File::create(path)?;
		file.write_all(CONFIG_FILE_HEADER.as_bytes())?;
		file.write_all(serialized.as_bytes())?;
		Ok(())
	}
}

// Applies environment overrides onto the parsed TOML tree, then
// deserializes it into the member sections.
fn finish_parse(mut value: Value, path: &str) -> Result<ConfigMembers, ConfigError> {
	apply_env_overrides(&mut value);
	value
		.try_into()
		.map_err(|e| ConfigError::ParseError(path.to_owned(), format!("{}", e)))
}

fn apply_env_overrides(value: &mut Value) {
	for (key, raw) in env::vars() {
		if !key.starts_with(ENV_PREFIX) {
			continue;
		}
		let remainder = &key[ENV_PREFIX.len()..];
		let mut parts = remainder.splitn(2, ENV_SEPARATOR);
		let section = match parts.next() {
			Some(s) if !s.is_empty() => s.to_lowercase(),
			_ => continue,
		};
		let option = match parts.next() {
			Some(o) if !o.is_empty() => o.to_lowercase(),
			_ => continue,
		};
		let parsed = parse_env_value(&raw);
		if let Some(table) = value.as_table_mut() {
			let section_value = table
				.entry(section)
				.or_insert_with(|| Value::Table(Default::default()));
			if let Some(section_table) = section_value.as_table_mut() {
				section_table.insert(option, parsed);
			}
		}
	}
}

// An override value is read as a TOML literal when possible (numbers,
// booleans, arrays), a plain string otherwise.
fn parse_env_value(raw: &str) -> Value {
	let wrapped = format!("v = {}", raw);
	match toml::from_str::<Value>(&wrapped) {
		Ok(Value::Table(mut t)) => t
			.remove("v")
			.unwrap_or_else(|| Value::String(raw.to_owned())),
		_ => Value::String(raw.to_owned()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	use bitnode_core::global::ChainTypes;

	#[test]
	fn read_config_sections() {
		let toml_str = r#"
			[node]
			minimum_connections = 4
			maximum_deviation = 2.0
			block_latency_seconds = 30

			[blockchain]

			[database]
			directory = "/var/lib/bitnode"
			index_addresses = false

			[network]
			host = "0.0.0.0"
			port = 8333
			protocol_maximum = 70015
			inbound_connections = 100
			outbound_connections = 8
			host_pool_capacity = 10000
			rotation_size = 10000000

			[bitcoin]
			network = "Testnet"
		"#;

		let value: Value = toml::from_str(toml_str).unwrap();
		let members: ConfigMembers = value.try_into().unwrap();
		assert_eq!(members.node.minimum_connections, 4);
		assert_eq!(members.node.block_latency_seconds, 30);
		assert_eq!(members.database.directory, "/var/lib/bitnode");
		assert_eq!(members.bitcoin.network, ChainTypes::Testnet);

		let node_config = members.node_config();
		assert_eq!(node_config.db_root, "/var/lib/bitnode");
		assert_eq!(node_config.chain_type, ChainTypes::Testnet);
		assert_eq!(node_config.p2p_config.port, 8333);
	}

	#[test]
	fn defaults_match_the_node_class() {
		let members = ConfigMembers::default();
		assert_eq!(members.database.index_addresses, false);
		assert_eq!(members.network.rotation_size, 10_000_000);
		assert_eq!(members.network.inbound_connections, 100);
		assert_eq!(members.network.outbound_connections, 8);
		assert_eq!(members.network.host_pool_capacity, 10_000);
	}

	#[test]
	fn env_override_applies_to_any_key() {
		env::set_var("BN_NETWORK__OUTBOUND_CONNECTIONS", "16");
		env::set_var("BN_DATABASE__DIRECTORY", "\"/tmp/bn-test\"");
		env::set_var("BN_NODE__MAXIMUM_DEVIATION", "3.5");

		let mut value = Value::try_from(ConfigMembers::default()).unwrap();
		apply_env_overrides(&mut value);
		let members: ConfigMembers = value.try_into().unwrap();

		assert_eq!(members.network.outbound_connections, 16);
		assert_eq!(members.database.directory, "/tmp/bn-test");
		assert_eq!(members.node.maximum_deviation, 3.5);

		env::remove_var("BN_NETWORK__OUTBOUND_CONNECTIONS");
		env::remove_var("BN_DATABASE__DIRECTORY");
		env::remove_var("BN_NODE__MAXIMUM_DEVIATION");
	}

	#[test]
	fn unparsable_env_value_becomes_a_string() {
		assert_eq!(
			parse_env_value("plain-string"),
			Value::String("plain-string".to_owned())
		);
		assert_eq!(parse_env_value("42"), Value::Integer(42));
		assert_eq!(parse_env_value("true"), Value::Boolean(true));
	}

	#[test]
	fn round_trip_through_serialization() {
		let config = GlobalConfig::default();
		let serialized = config.ser_config().unwrap();
		let value: Value = toml::from_str(&serialized).unwrap();
		let members: ConfigMembers = value.try_into().unwrap();
		assert_eq!(members, ConfigMembers::default());
	}
}
