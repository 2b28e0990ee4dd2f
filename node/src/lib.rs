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

//! Main crate gluing the different parts of the system (the peer-to-peer
//! server and the blockchain engine) into a running node and driving block
//! synchronization through reorganizations.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod common;
mod node;

pub use crate::common::types::{Error, NodeConfig};
pub use crate::node::executor::Executor;
pub use crate::node::full_node::{ChainTop, FullNode, NodeState};
pub use crate::node::reservations::{Reservation, Reservations};
