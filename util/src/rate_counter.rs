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

//! Measures how fast data moves over a peer connection.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// A sliding one-minute record of transfer events. Each recorded transfer
/// keeps its monotonic timestamp; totals are computed on demand from the
/// samples still inside the window. Old samples are only dropped when new
/// ones arrive, which keeps the accounting cheap at the cost of reported
/// rates being approximate.
pub struct RateCounter {
	samples: VecDeque<(Instant, u64)>,
}

impl RateCounter {
	/// A counter with nothing recorded yet.
	pub fn new() -> RateCounter {
		RateCounter {
			samples: VecDeque::new(),
		}
	}

	/// Records a transfer of the given size, dropping samples that have
	/// aged out of the window.
	pub fn inc(&mut self, bytes: u64) {
		let now = Instant::now();
		let aged_out = |sample: Option<&(Instant, u64)>| match sample {
			Some((stamp, _)) => now.duration_since(*stamp) > WINDOW,
			None => false,
		};
		while aged_out(self.samples.front()) {
			self.samples.pop_front();
		}
		self.samples.push_back((now, bytes));
	}

	/// Bytes moved within the last minute.
	pub fn bytes_per_min(&self) -> u64 {
		let now = Instant::now();
		self.samples
			.iter()
			.filter(|(stamp, _)| now.duration_since(*stamp) <= WINDOW)
			.map(|(_, bytes)| *bytes)
			.sum()
	}

	/// Transfer events within the last minute.
	pub fn count_per_min(&self) -> u64 {
		let now = Instant::now();
		self.samples
			.iter()
			.filter(|(stamp, _)| now.duration_since(*stamp) <= WINDOW)
			.count() as u64
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_counter_reports_zero() {
		let rc = RateCounter::new();
		assert_eq!(rc.bytes_per_min(), 0);
		assert_eq!(rc.count_per_min(), 0);
	}

	#[test]
	fn recent_transfers_accumulate() {
		let mut rc = RateCounter::new();
		rc.inc(100);
		rc.inc(300);
		rc.inc(0);
		assert_eq!(rc.bytes_per_min(), 400);
		assert_eq!(rc.count_per_min(), 3);
	}
}
