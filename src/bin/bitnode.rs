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

//! Main for building the binary of the bitnode peer-to-peer node.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

use clap::{App, Arg};

use bitnode_config as config;
use bitnode_core::global::{self, ChainTypes};
use bitnode_util::init_logger;

mod cmd;

fn main() {
	let exit_code = real_main();
	std::process::exit(exit_code);
}

fn real_main() -> i32 {
	let args = App::new("bitnode")
		.version(crate_version!())
		.author("The Bitnode Developers")
		.about("Bitcoin full node: downloads and maintains the block chain.")
		.arg(
			Arg::with_name("config")
				.long("config")
				.takes_value(true)
				.value_name("PATH")
				.help("Use the configuration file at PATH"),
		)
		.arg(
			Arg::with_name("settings")
				.long("settings")
				.help("Print the effective settings and exit"),
		)
		.arg(
			Arg::with_name("initchain")
				.long("initchain")
				.help("Initialize the chain data directory and exit"),
		)
		.arg(
			Arg::with_name("testnet")
				.long("testnet")
				.conflicts_with("regtest")
				.help("Join the test network"),
		)
		.arg(
			Arg::with_name("regtest")
				.long("regtest")
				.help("Run a local regression-test network"),
		)
		.get_matches();

	let global_config = match config::initial_setup_server(args.value_of("config")) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Failed to load configuration: {}", e);
			return 1;
		}
	};
	let mut members = match global_config.members.clone() {
		Some(members) => members,
		None => {
			eprintln!("Configuration carries no settings");
			return 1;
		}
	};

	// network flags take precedence over the [bitcoin] section
	if args.is_present("testnet") {
		members.bitcoin.network = ChainTypes::Testnet;
	} else if args.is_present("regtest") {
		members.bitcoin.network = ChainTypes::Regtest;
	}
	global::set_chain_type(members.bitcoin.network);

	if args.is_present("settings") {
		return cmd::print_settings(&members);
	}

	let logging = members.logging.clone().unwrap_or_default();
	init_logger(&logging);
	if global_config.using_config_file {
		info!(
			"Using configuration file at {}",
			global_config
				.config_file_path
				.as_ref()
				.map(|p| p.to_string_lossy().into_owned())
				.unwrap_or_else(|| "<none>".to_owned())
		);
	}

	let node_config = members.node_config();
	if args.is_present("initchain") {
		cmd::server::init_chain(&node_config)
	} else {
		cmd::server::server_command(&node_config)
	}
}
