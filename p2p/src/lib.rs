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

//! Networking code to connect to other peers, exchange blocks, headers and
//! transactions with them, and to accept their connections. The server owns
//! its listener and worker threads; sessions driving the protocol on top of
//! each peer are attached from outside through the session hooks.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

mod conn;
pub mod handshake;
pub mod msg;
mod peer;
mod peers;
mod serv;
pub mod types;

pub use crate::peer::Peer;
pub use crate::peers::Peers;
pub use crate::serv::Server;
pub use crate::types::{
	Direction, Error, NetAdapter, P2PConfig, PeerInfo, ServiceFlags, SessionFactory,
	MAX_BLOCK_HEADERS, MAX_LOCATORS, SEND_CHANNEL_CAP,
};
