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

//! Consensus-adjacent helpers the node needs for branch selection. Full
//! validation of proof-of-work, scripts and signatures is performed by the
//! chain validation collaborator, not here; the node only needs enough to
//! order competing branches by accumulated work.

/// Proof-of-work bits of the mainnet and testnet genesis blocks.
pub const GENESIS_BITS: u32 = 0x1d00_ffff;

/// Proof-of-work bits of the regtest genesis block.
pub const REGTEST_GENESIS_BITS: u32 = 0x207f_ffff;

/// Approximate work contributed by a header with the given compact-form
/// difficulty target. Work is 2^256 divided by (target + 1); since a real
/// target occupies well under 128 bits of headroom below 2^256, the
/// quotient fits a u128 for every target a peer can legitimately present.
/// A malformed compact form yields zero work, which orders it last.
pub fn work_from_bits(bits: u32) -> u128 {
	let exponent = (bits >> 24) as i32;
	let mantissa = (bits & 0x00ff_ffff) as u128;
	if mantissa == 0 {
		return 0;
	}
	// target = mantissa * 256^(exponent - 3), so
	// work ~ 2^(256 - 8*(exponent - 3)) / mantissa
	let shift = 256 - 8 * (exponent - 3);
	if shift <= 0 {
		// target at or above 2^256, practically zero work
		return 0;
	}
	if shift >= 128 {
		// tiny target, enormous work; saturate
		return u128::max_value() / mantissa;
	}
	(1u128 << shift) / mantissa
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn genesis_work_is_about_2_to_32() {
		let w = work_from_bits(GENESIS_BITS);
		// difficulty-1 work is 2^48 / 0xffff, just over 2^32
		assert!(w > 1u128 << 32);
		assert!(w < 1u128 << 33);
	}

	#[test]
	fn regtest_work_is_tiny() {
		let w = work_from_bits(REGTEST_GENESIS_BITS);
		assert!(w >= 2);
		assert!(w < 16);
	}

	#[test]
	fn harder_bits_mean_more_work() {
		// smaller target (lower exponent) accumulates more work
		assert!(work_from_bits(0x1c00_ffff) > work_from_bits(GENESIS_BITS));
	}

	#[test]
	fn zero_mantissa_is_zero_work() {
		assert_eq!(work_from_bits(0x1d00_0000), 0);
	}
}
