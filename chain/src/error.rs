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

//! Error types for chain
use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};
use std::io;

use bitnode_core::core::hash::Hash;
use bitnode_core::ser;

/// Error definition
#[derive(Debug)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// The store has not been opened or failed an internal invariant. The
	/// database must be treated as unusable.
	#[fail(display = "Chain store corrupt: {}", _0)]
	Corrupt(String),
	/// The lifecycle has entered stopping; the operation was not performed.
	#[fail(display = "Chain service stopped")]
	ServiceStopped,
	/// No chain exists under the data directory and a genesis block is
	/// required before the node can run.
	#[fail(display = "Genesis block required, run --initchain first")]
	GenesisBlockRequired,
	/// The stored genesis does not match the configured network.
	#[fail(display = "Genesis mismatch, store has {}, network wants {}", stored, ours)]
	GenesisMismatch {
		/// Genesis recorded in the store
		stored: Hash,
		/// Genesis of the configured network
		ours: Hash,
	},
	/// A batch of headers does not connect to any block we know.
	#[fail(display = "Orphan header batch starting at {}", _0)]
	OrphanHeaders(Hash),
	/// A header batch is not internally contiguous.
	#[fail(display = "Discontiguous header batch")]
	DiscontiguousHeaders,
	/// A block body does not match the merkle commitment in its header.
	#[fail(display = "Bad merkle root for block {}", _0)]
	BadMerkleRoot(Hash),
	/// Error serializing or deserializing a type
	#[fail(display = "Serialization error")]
	SerErr(String),
	/// Wrapped IO error from the store directory
	#[fail(display = "IO error: {}", _0)]
	IOErr(String),
}

impl Fail for Error {
	fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}

	fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.inner, f)
	}
}

impl Error {
	/// The kind of error
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::IOErr(format!("{}", e))),
		}
	}
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::SerErr(format!("{}", e))),
		}
	}
}
