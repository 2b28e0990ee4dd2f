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

//! Serialization and deserialization layer specialized for the Bitcoin wire
//! encoding: little-endian integers, variable-size integer prefixes and raw
//! fixed-size byte runs. Every chain construct reads and writes through the
//! `Writeable` and `Readable` traits so hashing and network transfer share
//! one encoding.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Possible errors deriving from serializing or deserializing.
#[derive(Debug, Fail)]
pub enum Error {
	/// Wraps an io error produced when reading or writing
	#[fail(display = "serialization IO error: {}", _0)]
	IOErr(String),
	/// Data wasn't in a consumable format
	#[fail(display = "corrupted data")]
	CorruptedData,
	/// When asked to read too much data
	#[fail(display = "too large read, requested: {}", _0)]
	TooLargeReadErr(u64),
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOErr(format!("{}", e))
	}
}

/// Upper bound on a single length-prefixed collection, protects the reader
/// against hostile prefixes.
const MAX_READ_ITEMS: u64 = 1_000_000;

/// Trait that every type that can be serialized as binary must implement.
/// Writes directly to a Writer, a utility type thinly wrapping an
/// underlying Write implementation.
pub trait Writeable {
	/// Write the data held by this Writeable to the provided writer
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), Error>;
}

/// Trait that every type that can be deserialized from binary must implement.
pub trait Readable: Sized {
	/// Reads the data necessary to this Readable from the provided reader
	fn read<R: Read>(reader: &mut R) -> Result<Self, Error>;
}

/// Serializes a Writeable into a vector of bytes.
pub fn ser_vec<W: Writeable>(thing: &W) -> Result<Vec<u8>, Error> {
	let mut vec = vec![];
	thing.write(&mut vec)?;
	Ok(vec)
}

/// Deserializes a Readable from a slice of bytes.
pub fn deserialize<T: Readable>(mut source: &[u8]) -> Result<T, Error> {
	T::read(&mut source)
}

/// Writes a Bitcoin variable-size integer (CompactSize).
pub fn write_varint<W: Write>(writer: &mut W, n: u64) -> Result<(), Error> {
	match n {
		0..=0xfc => writer.write_u8(n as u8)?,
		0xfd..=0xffff => {
			writer.write_u8(0xfd)?;
			writer.write_u16::<LittleEndian>(n as u16)?;
		}
		0x10000..=0xffff_ffff => {
			writer.write_u8(0xfe)?;
			writer.write_u32::<LittleEndian>(n as u32)?;
		}
		_ => {
			writer.write_u8(0xff)?;
			writer.write_u64::<LittleEndian>(n)?;
		}
	}
	Ok(())
}

/// Reads a Bitcoin variable-size integer (CompactSize).
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64, Error> {
	let prefix = reader.read_u8()?;
	let n = match prefix {
		0xfd => reader.read_u16::<LittleEndian>()? as u64,
		0xfe => reader.read_u32::<LittleEndian>()? as u64,
		0xff => reader.read_u64::<LittleEndian>()?,
		n => n as u64,
	};
	Ok(n)
}

/// Writes a length-prefixed run of raw bytes.
pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), Error> {
	write_varint(writer, bytes.len() as u64)?;
	writer.write_all(bytes)?;
	Ok(())
}

/// Reads a length-prefixed run of raw bytes.
pub fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, Error> {
	let len = read_varint(reader)?;
	if len > MAX_READ_ITEMS {
		return Err(Error::TooLargeReadErr(len));
	}
	let mut buf = vec![0u8; len as usize];
	reader.read_exact(&mut buf)?;
	Ok(buf)
}

/// Writes a length-prefixed vector of Writeables.
pub fn write_vec<W: Write, T: Writeable>(writer: &mut W, elems: &[T]) -> Result<(), Error> {
	write_varint(writer, elems.len() as u64)?;
	for elem in elems {
		elem.write(writer)?;
	}
	Ok(())
}

/// Reads a length-prefixed vector of Readables.
pub fn read_vec<R: Read, T: Readable>(reader: &mut R) -> Result<Vec<T>, Error> {
	let len = read_varint(reader)?;
	if len > MAX_READ_ITEMS {
		return Err(Error::TooLargeReadErr(len));
	}
	let mut elems = Vec::with_capacity(len as usize);
	for _ in 0..len {
		elems.push(T::read(reader)?);
	}
	Ok(elems)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn varint_round_trip() {
		for n in &[0u64, 1, 0xfc, 0xfd, 0xffff, 0x10000, 0xffff_ffff, u64::max_value()] {
			let mut buf = vec![];
			write_varint(&mut buf, *n).unwrap();
			assert_eq!(read_varint(&mut &buf[..]).unwrap(), *n);
		}
	}

	#[test]
	fn varint_boundary_encodings() {
		let mut buf = vec![];
		write_varint(&mut buf, 0xfc).unwrap();
		assert_eq!(buf, vec![0xfc]);

		let mut buf = vec![];
		write_varint(&mut buf, 0xfd).unwrap();
		assert_eq!(buf, vec![0xfd, 0xfd, 0x00]);
	}

	#[test]
	fn hostile_length_prefix_rejected() {
		// 0xff prefix followed by u64::MAX, should not allocate
		let buf = vec![
			0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
		];
		match read_bytes(&mut &buf[..]) {
			Err(Error::TooLargeReadErr(_)) => (),
			other => panic!("expected TooLargeReadErr, got {:?}", other),
		}
	}
}
