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

//! Small shared pieces the rest of the workspace leans on: log output
//! setup, lock re-exports, late wiring of collaborators and transfer-rate
//! measurement.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

// Re-export so only has to be included once
pub use parking_lot::Mutex;
pub use parking_lot::RwLock;

// Logging related
pub mod logger;
pub use crate::logger::{init_logger, init_test_logger};

pub mod types;
pub use crate::types::{LogLevel, LoggingConfig};

pub mod rate_counter;
pub use crate::rate_counter::RateCounter;

use std::sync::atomic::{AtomicBool, Ordering};

/// Holder for a collaborator that can only be handed over once the owning
/// structure already exists, breaking what would otherwise be a cycle at
/// construction time. The slot is written exactly once during composition
/// and read afterwards; reading it unwired is a composition-order bug and
/// panics.
pub struct LateInit<T> {
	slot: RwLock<Option<T>>,
}

impl<T: Clone> LateInit<T> {
	/// An empty, unwired slot.
	pub fn new() -> LateInit<T> {
		LateInit {
			slot: RwLock::new(None),
		}
	}

	/// Wires the value in. Panics on a second call.
	pub fn set(&self, value: T) {
		let mut slot = self.slot.write();
		assert!(slot.is_none(), "late-init slot wired twice");
		*slot = Some(value);
	}

	/// Whether the slot has been wired yet.
	pub fn is_set(&self) -> bool {
		self.slot.read().is_some()
	}

	/// A copy of the wired value, None while unwired.
	pub fn try_get(&self) -> Option<T> {
		self.slot.read().clone()
	}

	/// A copy of the wired value. Panics while unwired.
	pub fn get(&self) -> T {
		self.try_get().expect("late-init slot read before being wired")
	}
}

/// Cooperative stop flag shared between the various subsystem threads.
/// Threads poll it at their own granularity and wind down once raised.
pub struct StopState {
	stopping: AtomicBool,
}

impl StopState {
	/// New stop state, not yet stopping.
	pub fn new() -> StopState {
		StopState {
			stopping: AtomicBool::new(false),
		}
	}

	/// Raise the stop flag. Idempotent.
	pub fn stop(&self) {
		self.stopping.store(true, Ordering::SeqCst);
	}

	/// Whether the stop flag has been raised.
	pub fn is_stopped(&self) -> bool {
		self.stopping.load(Ordering::SeqCst)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn late_init_wires_once_and_reads_after() {
		let slot: LateInit<u32> = LateInit::new();
		assert!(!slot.is_set());
		assert_eq!(slot.try_get(), None);
		slot.set(42);
		assert!(slot.is_set());
		assert_eq!(slot.get(), 42);
		assert_eq!(slot.try_get(), Some(42));
	}

	#[test]
	#[should_panic(expected = "wired twice")]
	fn late_init_rejects_rewiring() {
		let slot = LateInit::new();
		slot.set(1);
		slot.set(2);
	}

	#[test]
	fn stop_state_latches() {
		let s = StopState::new();
		assert!(!s.is_stopped());
		s.stop();
		s.stop();
		assert!(s.is_stopped());
	}
}
