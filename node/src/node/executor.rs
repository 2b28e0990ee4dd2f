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

//! Process-level driver: builds a full node, traps termination signals
//! into a shared flag, parks until the flag or the node itself says stop,
//! then sequences the shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::common::types::NodeConfig;
use crate::node::full_node::FullNode;

/// Granularity at which the stop monitor polls the flag and the node.
const MONITOR_POLL_MILLIS: u64 = 10;

/// Builds and drives a full node for the lifetime of the process.
pub struct Executor {
	config: NodeConfig,
}

impl Executor {
	/// Executor for the given node configuration.
	pub fn new(config: NodeConfig) -> Executor {
		Executor { config }
	}

	/// Runs the node until a termination signal or an internal stop,
	/// then shuts it down. Returns the process exit code.
	pub fn run(&self) -> i32 {
		let node = match FullNode::new(self.config.clone()) {
			Ok(node) => Arc::new(node),
			Err(e) => {
				error!("Failed to build the node: {}", e);
				return 1;
			}
		};

		if let Err(e) = node.start() {
			error!("Node failed to start: {}", e);
			return 1;
		}
		if let Err(e) = node.run() {
			error!("Node failed to run: {}", e);
			let _ = node.stop();
			let _ = node.close();
			return 1;
		}

		// signal handler does nothing but set the flag
		let stopped = Arc::new(AtomicBool::new(false));
		let flag = stopped.clone();
		if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
			error!("Failed to register the signal handler: {}", e);
			let _ = node.stop();
			let _ = node.close();
			return 1;
		}

		self.wait_on_stop(&node, &stopped);

		warn!("Shutting down, please wait while unmapping the store...");
		let stop_ok = match node.stop() {
			Ok(()) => true,
			Err(e) => {
				error!("Node failed to stop: {}", e);
				false
			}
		};
		let close_ok = match node.close() {
			Ok(()) => true,
			Err(e) => {
				error!("Node failed to close: {}", e);
				false
			}
		};
		drop(node);

		if stop_ok && close_ok {
			info!("Node shutdown complete.");
			0
		} else {
			1
		}
	}

	// Parks the calling thread on a promise the monitor thread fulfills
	// when either the signal flag or the node's own lifecycle says stop.
	fn wait_on_stop(&self, node: &Arc<FullNode>, stopped: &Arc<AtomicBool>) {
		let (fulfill, promise) = mpsc::channel();
		let node = node.clone();
		let stopped = stopped.clone();
		let _ = thread::Builder::new()
			.name("monitor_stop".to_string())
			.spawn(move || loop {
				if stopped.load(Ordering::SeqCst) || node.stopped() {
					let _ = fulfill.send(());
					break;
				}
				thread::sleep(Duration::from_millis(MONITOR_POLL_MILLIS));
			});
		let _ = promise.recv();
	}
}
