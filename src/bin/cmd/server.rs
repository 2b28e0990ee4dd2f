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

//! Server command processing: chain initialization and the long-running
//! node itself.

use bitnode_chain::Chain;
use bitnode_core::genesis;
use bitnode_node::{Executor, NodeConfig};

/// Creates the chain data directory and writes the genesis block of the
/// selected network, the `--initchain` operation.
pub fn init_chain(config: &NodeConfig) -> i32 {
	let genesis = genesis::genesis();
	match Chain::bootstrap(&config.db_root, &genesis) {
		Ok(()) => {
			info!(
				"Initialized chain directory {} with genesis {}",
				config.db_root,
				genesis.hash()
			);
			0
		}
		Err(e) => {
			error!("Failed to initialize chain directory: {}", e);
			1
		}
	}
}

/// Runs the node until shutdown, returning the process exit code.
pub fn server_command(config: &NodeConfig) -> i32 {
	warn!("Starting bitnode...");
	Executor::new(config.clone()).run()
}
