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

//! Blocks and block headers. A header is always exactly 80 bytes on the
//! wire; its double SHA-256 is the block's identity.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::core::hash::{sha256d, Hash, Hashed};
use crate::core::transaction::Transaction;
use crate::ser::{self, read_vec, write_vec, Readable, Writeable};

/// An 80-byte Bitcoin block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
	/// Block version
	pub version: i32,
	/// Hash of the previous block in the chain
	pub prev_hash: Hash,
	/// Merkle root of the block's transactions
	pub merkle_root: Hash,
	/// Block timestamp (seconds since the epoch)
	pub timestamp: u32,
	/// Difficulty target in compact form
	pub bits: u32,
	/// Proof-of-work nonce
	pub nonce: u32,
}

impl Writeable for BlockHeader {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32::<LittleEndian>(self.version)?;
		self.prev_hash.write(writer)?;
		self.merkle_root.write(writer)?;
		writer.write_u32::<LittleEndian>(self.timestamp)?;
		writer.write_u32::<LittleEndian>(self.bits)?;
		writer.write_u32::<LittleEndian>(self.nonce)?;
		Ok(())
	}
}

impl Readable for BlockHeader {
	fn read<R: Read>(reader: &mut R) -> Result<BlockHeader, ser::Error> {
		Ok(BlockHeader {
			version: reader.read_i32::<LittleEndian>()?,
			prev_hash: Hash::read(reader)?,
			merkle_root: Hash::read(reader)?,
			timestamp: reader.read_u32::<LittleEndian>()?,
			bits: reader.read_u32::<LittleEndian>()?,
			nonce: reader.read_u32::<LittleEndian>()?,
		})
	}
}

/// A full block: header plus the transactions it commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	/// The block header
	pub header: BlockHeader,
	/// The block's transactions, coinbase first
	pub txs: Vec<Transaction>,
}

impl Writeable for Block {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		write_vec(writer, &self.txs)?;
		Ok(())
	}
}

impl Readable for Block {
	fn read<R: Read>(reader: &mut R) -> Result<Block, ser::Error> {
		Ok(Block {
			header: BlockHeader::read(reader)?,
			txs: read_vec(reader)?,
		})
	}
}

impl Block {
	/// Block identity, the hash of its header.
	pub fn hash(&self) -> Hash {
		self.header.hash()
	}

	/// Computes the merkle root of the block's transactions and compares it
	/// against the root the header commits to.
	pub fn verify_merkle_root(&self) -> bool {
		merkle_root(&self.txs) == self.header.merkle_root
	}
}

/// Computes the merkle root of a list of transactions: pairwise double
/// SHA-256 folding, duplicating the last node at odd levels.
pub fn merkle_root(txs: &[Transaction]) -> Hash {
	if txs.is_empty() {
		return crate::core::hash::ZERO_HASH;
	}
	let mut layer: Vec<Hash> = txs.iter().map(|tx| tx.hash()).collect();
	while layer.len() > 1 {
		let mut next = Vec::with_capacity((layer.len() + 1) / 2);
		for pair in layer.chunks(2) {
			let left = pair[0];
			let right = if pair.len() == 2 { pair[1] } else { pair[0] };
			let mut concat = [0u8; 64];
			concat[..32].copy_from_slice(left.to_slice());
			concat[32..].copy_from_slice(right.to_slice());
			next.push(sha256d(&concat));
		}
		layer = next;
	}
	layer[0]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::genesis;
	use crate::ser::{deserialize, ser_vec};

	#[test]
	fn header_is_80_bytes() {
		let b = genesis::genesis_main();
		let bytes = ser_vec(&b.header).unwrap();
		assert_eq!(bytes.len(), 80);
	}

	#[test]
	fn header_ser_round_trip() {
		let b = genesis::genesis_main();
		let bytes = ser_vec(&b.header).unwrap();
		let out: BlockHeader = deserialize(&bytes).unwrap();
		assert_eq!(b.header, out);
	}

	#[test]
	fn single_tx_merkle_root_is_tx_hash() {
		let b = genesis::genesis_main();
		assert_eq!(merkle_root(&b.txs), b.txs[0].hash());
		assert!(b.verify_merkle_root());
	}
}
