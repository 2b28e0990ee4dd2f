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

//! Transactions. The node relays and stores them; script and signature
//! validation belongs to the chain engine's validation collaborator and is
//! not performed here.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::core::hash::Hash;
use crate::ser::{self, read_bytes, read_vec, write_bytes, write_vec, Readable, Writeable};

/// Reference to an output of a previous transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
	/// Hash of the referenced transaction
	pub hash: Hash,
	/// Index of the referenced output in the transaction
	pub index: u32,
}

impl Writeable for OutPoint {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		writer.write_u32::<LittleEndian>(self.index)?;
		Ok(())
	}
}

impl Readable for OutPoint {
	fn read<R: Read>(reader: &mut R) -> Result<OutPoint, ser::Error> {
		Ok(OutPoint {
			hash: Hash::read(reader)?,
			index: reader.read_u32::<LittleEndian>()?,
		})
	}
}

/// A transaction input spending a previous output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
	/// The output being spent
	pub prev_out: OutPoint,
	/// Unlocking script
	pub script_sig: Vec<u8>,
	/// Input sequence number
	pub sequence: u32,
}

impl Writeable for TxIn {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.prev_out.write(writer)?;
		write_bytes(writer, &self.script_sig)?;
		writer.write_u32::<LittleEndian>(self.sequence)?;
		Ok(())
	}
}

impl Readable for TxIn {
	fn read<R: Read>(reader: &mut R) -> Result<TxIn, ser::Error> {
		Ok(TxIn {
			prev_out: OutPoint::read(reader)?,
			script_sig: read_bytes(reader)?,
			sequence: reader.read_u32::<LittleEndian>()?,
		})
	}
}

/// A transaction output carrying a value locked by a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
	/// Value in satoshis
	pub value: u64,
	/// Locking script
	pub script_pubkey: Vec<u8>,
}

impl Writeable for TxOut {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64::<LittleEndian>(self.value)?;
		write_bytes(writer, &self.script_pubkey)?;
		Ok(())
	}
}

impl Readable for TxOut {
	fn read<R: Read>(reader: &mut R) -> Result<TxOut, ser::Error> {
		Ok(TxOut {
			value: reader.read_u64::<LittleEndian>()?,
			script_pubkey: read_bytes(reader)?,
		})
	}
}

/// A full transaction in the legacy (pre-witness) encoding, which is also
/// the encoding that defines a transaction's hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Transaction version
	pub version: i32,
	/// Inputs
	pub inputs: Vec<TxIn>,
	/// Outputs
	pub outputs: Vec<TxOut>,
	/// Earliest block or time at which the transaction may be mined
	pub lock_time: u32,
}

impl Writeable for Transaction {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32::<LittleEndian>(self.version)?;
		write_vec(writer, &self.inputs)?;
		write_vec(writer, &self.outputs)?;
		writer.write_u32::<LittleEndian>(self.lock_time)?;
		Ok(())
	}
}

impl Readable for Transaction {
	fn read<R: Read>(reader: &mut R) -> Result<Transaction, ser::Error> {
		Ok(Transaction {
			version: reader.read_i32::<LittleEndian>()?,
			inputs: read_vec(reader)?,
			outputs: read_vec(reader)?,
			lock_time: reader.read_u32::<LittleEndian>()?,
		})
	}
}

impl Transaction {
	/// Whether this is a coinbase transaction (single input spending the
	/// null outpoint).
	pub fn is_coinbase(&self) -> bool {
		self.inputs.len() == 1
			&& self.inputs[0].prev_out.hash == crate::core::hash::ZERO_HASH
			&& self.inputs[0].prev_out.index == u32::max_value()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::hash::ZERO_HASH;
	use crate::ser::{deserialize, ser_vec};

	fn sample_tx() -> Transaction {
		Transaction {
			version: 1,
			inputs: vec![TxIn {
				prev_out: OutPoint {
					hash: ZERO_HASH,
					index: u32::max_value(),
				},
				script_sig: vec![0x51],
				sequence: u32::max_value(),
			}],
			outputs: vec![TxOut {
				value: 50_0000_0000,
				script_pubkey: vec![0x51],
			}],
			lock_time: 0,
		}
	}

	#[test]
	fn tx_ser_round_trip() {
		let tx = sample_tx();
		let bytes = ser_vec(&tx).unwrap();
		let out: Transaction = deserialize(&bytes).unwrap();
		assert_eq!(tx, out);
	}

	#[test]
	fn coinbase_detection() {
		assert!(sample_tx().is_coinbase());
	}
}
