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

//! Hash Function
//!
//! Primary hash function used in the protocol: double SHA-256 over a type's
//! wire serialization.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::ser::{self, Readable, Writeable};
use std::io::{Read, Write};

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Used pervasively for blocks, transactions and headers.
/// Stored in the internal (little-endian) byte order; displayed reversed,
/// following the convention every Bitcoin tool uses.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for i in self.0.iter().rev() {
			write!(f, "{:02x}", i)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self)
	}
}

impl Hash {
	/// Creates a new hash from a byte vector, panics if the vector is not
	/// exactly 32 bytes. Only used where the length is structurally known.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut a = [0; 32];
		a.copy_from_slice(&v[..32]);
		Hash(a)
	}

	/// Parses the display (reversed hex) representation of a hash.
	pub fn from_hex(hex: &str) -> Result<Hash, ser::Error> {
		if hex.len() != 64 {
			return Err(ser::Error::CorruptedData);
		}
		let mut a = [0u8; 32];
		for i in 0..32 {
			let byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
				.map_err(|_| ser::Error::CorruptedData)?;
			a[31 - i] = byte;
		}
		Ok(Hash(a))
	}

	/// Converts the hash to a byte vector
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// Converts the hash to a byte slice
	pub fn to_slice(&self) -> &[u8] {
		&self.0
	}
}

impl Writeable for Hash {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_all(&self.0)?;
		Ok(())
	}
}

impl Readable for Hash {
	fn read<R: Read>(reader: &mut R) -> Result<Hash, ser::Error> {
		let mut a = [0u8; 32];
		reader.read_exact(&mut a)?;
		Ok(Hash(a))
	}
}

/// The "zero" hash, all zeroes. Previous-block reference of a genesis header.
pub const ZERO_HASH: Hash = Hash([0; 32]);

/// Double SHA-256 of an arbitrary byte run.
pub fn sha256d(data: &[u8]) -> Hash {
	let first = Sha256::digest(data);
	let second = Sha256::digest(&first);
	Hash::from_vec(&second)
}

/// A trait for types that get their hash (double SHA-256) from their wire
/// serialization.
pub trait Hashed {
	/// Obtain the hash of the object
	fn hash(&self) -> Hash;
}

impl<T: Writeable> Hashed for T {
	fn hash(&self) -> Hash {
		let data = ser::ser_vec(self).expect("in-memory serialization");
		sha256d(&data)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_is_reversed_hex() {
		let mut bytes = [0u8; 32];
		bytes[31] = 0xab;
		let h = Hash(bytes);
		assert!(format!("{}", h).starts_with("ab00"));
	}

	#[test]
	fn hex_round_trip() {
		let h = sha256d(b"bitnode");
		let parsed = Hash::from_hex(&format!("{}", h)).unwrap();
		assert_eq!(h, parsed);
	}

	#[test]
	fn sha256d_known_vector() {
		// double SHA-256 of the empty string
		let h = sha256d(b"");
		assert_eq!(
			format!("{}", h),
			"56944c5d3f98413ef45cf54545538103cc9f298e0575820ad3591376e2e0f65d"
		);
	}
}
