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

//! Command processing for the node binary.

pub mod server;

use bitnode_config::ConfigMembers;

/// Prints the effective settings (file plus environment plus flags) as
/// they would be written to a configuration file.
pub fn print_settings(members: &ConfigMembers) -> i32 {
	match toml_of(members) {
		Ok(serialized) => {
			println!("{}", serialized);
			0
		}
		Err(e) => {
			eprintln!("Failed to serialize settings: {}", e);
			1
		}
	}
}

fn toml_of(members: &ConfigMembers) -> Result<String, String> {
	use bitnode_config::GlobalConfig;
	let config = GlobalConfig {
		config_file_path: None,
		using_config_file: false,
		members: Some(members.clone()),
	};
	config.ser_config().map_err(|e| format!("{}", e))
}
