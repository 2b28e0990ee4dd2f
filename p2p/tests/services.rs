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

use bitnode_p2p::ServiceFlags;

// We use `contains()` to filter service bits.
#[test]
fn services_contains() {
	let x = ServiceFlags::NODE_NETWORK;

	// service sets contain themselves
	assert!(x.contains(ServiceFlags::NODE_NETWORK));

	// NONE can be used to filter for any services
	assert!(x.contains(ServiceFlags::NONE));

	// disjoint bits are not contained
	assert_eq!(false, x.contains(ServiceFlags::NODE_WITNESS));
}

#[test]
fn default_services() {
	let x = ServiceFlags::default();

	assert!(x.contains(ServiceFlags::NODE_NETWORK));
	assert!(x.contains(ServiceFlags::NODE_WITNESS));

	assert_eq!(x, ServiceFlags::NODE_NETWORK | ServiceFlags::NODE_WITNESS);
}

#[test]
fn services_bits_are_wire_values() {
	// the values peers put in their version message
	assert_eq!(ServiceFlags::NODE_NETWORK.bits(), 1);
	assert_eq!(ServiceFlags::NODE_WITNESS.bits(), 8);
}
