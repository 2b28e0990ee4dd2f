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

//! P2P server implementation: binds the listener, accepts connections from
//! other peers, dials the configured outbound and manual hosts, and keeps
//! the peer registry healthy. Start completes on the calling thread; run
//! spawns the worker threads and returns immediately.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bitnode_util::{LateInit, Mutex, StopState};

use crate::handshake::Handshake;
use crate::peer::Peer;
use crate::peers::Peers;
use crate::types::{Direction, Error, NetAdapter, P2PConfig, SessionFactory};

/// P2P server handling connections to and from other peers.
pub struct Server {
	config: P2PConfig,
	/// The registry of currently connected peers
	pub peers: Arc<Peers>,
	handshake: Arc<Handshake>,
	adapter: Arc<dyn NetAdapter>,
	sessions: LateInit<Arc<dyn SessionFactory>>,
	stop_state: Arc<StopState>,
	listener: Mutex<Option<TcpListener>>,
	threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
	/// Creates a new idle p2p server with no peers.
	pub fn new(config: P2PConfig, adapter: Arc<dyn NetAdapter>) -> Server {
		Server {
			peers: Arc::new(Peers::new(config.clone())),
			handshake: Arc::new(Handshake::new(config.clone())),
			config,
			adapter,
			sessions: LateInit::new(),
			stop_state: Arc::new(StopState::new()),
			listener: Mutex::new(None),
			threads: Mutex::new(vec![]),
		}
	}

	/// Registers the factory whose attach_*_session hooks are invoked for
	/// every peer that completes a handshake. Must precede `run`.
	pub fn set_session_factory(&self, factory: Arc<dyn SessionFactory>) {
		self.sessions.set(factory);
	}

	/// Binds the TCP listener. Completes (or fails) on the calling thread.
	pub fn start(&self) -> Result<(), Error> {
		let addr = SocketAddr::new(self.config.host, self.config.port());
		let listener = TcpListener::bind(addr)?;
		listener.set_nonblocking(true)?;
		info!("P2P server listening on {}", addr);
		*self.listener.lock() = Some(listener);
		Ok(())
	}

	/// Spawns the accept loop, the outbound dialer, the manual connector
	/// and the peer monitor, then returns immediately.
	pub fn run(&self) -> Result<(), Error> {
		let listener = self
			.listener
			.lock()
			.take()
			.ok_or_else(|| Error::Internal("run called before start".to_owned()))?;

		let sessions = self.sessions.try_get();

		let mut threads = self.threads.lock();

		{
			let peers = self.peers.clone();
			let handshake = self.handshake.clone();
			let adapter = self.adapter.clone();
			let stop_state = self.stop_state.clone();
			let sessions = sessions.clone();
			threads.push(
				thread::Builder::new()
					.name("p2p-accept".to_string())
					.spawn(move || {
						accept_loop(listener, peers, handshake, adapter, sessions, stop_state)
					})?,
			);
		}

		if let Some(seeds) = self.config.peers_seed.clone() {
			let peers = self.peers.clone();
			let handshake = self.handshake.clone();
			let adapter = self.adapter.clone();
			let stop_state = self.stop_state.clone();
			let sessions = sessions.clone();
			threads.push(
				thread::Builder::new()
					.name("p2p-dial".to_string())
					.spawn(move || {
						dial_loop(seeds, peers, handshake, adapter, sessions, stop_state)
					})?,
			);
		}

		if let Some(hosts) = self.config.peers_connect.clone() {
			let peers = self.peers.clone();
			let handshake = self.handshake.clone();
			let adapter = self.adapter.clone();
			let stop_state = self.stop_state.clone();
			threads.push(
				thread::Builder::new()
					.name("p2p-manual".to_string())
					.spawn(move || {
						manual_loop(hosts, peers, handshake, adapter, sessions, stop_state)
					})?,
			);
		}

		{
			let peers = self.peers.clone();
			let stop_state = self.stop_state.clone();
			threads.push(
				thread::Builder::new()
					.name("p2p-monitor".to_string())
					.spawn(move || monitor_loop(peers, stop_state))?,
			);
		}

		Ok(())
	}

	/// Number of peers currently connected.
	pub fn peer_count(&self) -> u32 {
		self.peers.peer_count()
	}

	/// Raises the stop flag and closes every peer connection.
	pub fn stop(&self) {
		self.stop_state.stop();
		self.peers.stop_all();
	}

	/// Joins the worker threads. Must follow `stop`.
	pub fn close(&self) {
		let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
		for handle in threads {
			let name = handle.thread().name().unwrap_or("p2p").to_string();
			match handle.join() {
				Ok(_) => debug!("{} thread stopped", name),
				Err(e) => error!("failed to join {} thread: {:?}", name, e),
			}
		}
		*self.listener.lock() = None;
	}
}

fn accept_loop(
	listener: TcpListener,
	peers: Arc<Peers>,
	handshake: Arc<Handshake>,
	adapter: Arc<dyn NetAdapter>,
	sessions: Option<Arc<dyn SessionFactory>>,
	stop_state: Arc<StopState>,
) {
	let sleep_time = Duration::from_millis(5);
	loop {
		if stop_state.is_stopped() {
			break;
		}
		match listener.accept() {
			Ok((stream, peer_addr)) => {
				if !peers.accepting_inbound() {
					debug!("Inbound connection cap reached, refusing {}", peer_addr);
					continue;
				}
				match accept_peer(stream, peer_addr, &handshake, &adapter) {
					Ok(peer) => {
						peers.add_connected(peer.clone());
						if let Some(factory) = &sessions {
							factory.attach_inbound_session(peer);
						}
					}
					Err(e) => debug!("Error accepting peer {}: {:?}", peer_addr, e),
				}
			}
			Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
				// nothing to do, will retry in next iteration
			}
			Err(e) => warn!("Couldn't establish new client connection: {:?}", e),
		}
		thread::sleep(sleep_time);
	}
}

fn accept_peer(
	mut stream: TcpStream,
	addr: SocketAddr,
	handshake: &Handshake,
	adapter: &Arc<dyn NetAdapter>,
) -> Result<Arc<Peer>, Error> {
	stream.set_nonblocking(false)?;
	let info = handshake.accept(&mut stream, addr, adapter.total_height())?;
	Peer::new(stream, info, adapter.clone())
}

fn connect_peer(
	addr: SocketAddr,
	direction: Direction,
	handshake: &Handshake,
	adapter: &Arc<dyn NetAdapter>,
) -> Result<Arc<Peer>, Error> {
	let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(10))?;
	let info = handshake.initiate(&mut stream, addr, direction, adapter.total_height())?;
	Peer::new(stream, info, adapter.clone())
}

fn dial_loop(
	seeds: Vec<SocketAddr>,
	peers: Arc<Peers>,
	handshake: Arc<Handshake>,
	adapter: Arc<dyn NetAdapter>,
	sessions: Option<Arc<dyn SessionFactory>>,
	stop_state: Arc<StopState>,
) {
	loop {
		if stop_state.is_stopped() {
			break;
		}
		for addr in &seeds {
			if stop_state.is_stopped() {
				break;
			}
			if !peers.wants_outbound() {
				break;
			}
			if peers.is_known(addr) {
				continue;
			}
			match connect_peer(*addr, Direction::Outbound, &handshake, &adapter) {
				Ok(peer) => {
					peers.add_connected(peer.clone());
					if let Some(factory) = &sessions {
						factory.attach_outbound_session(peer);
					}
				}
				Err(e) => debug!("Outbound connect to {} failed: {:?}", addr, e),
			}
		}
		thread::sleep(Duration::from_secs(1));
	}
}

fn manual_loop(
	hosts: Vec<SocketAddr>,
	peers: Arc<Peers>,
	handshake: Arc<Handshake>,
	adapter: Arc<dyn NetAdapter>,
	sessions: Option<Arc<dyn SessionFactory>>,
	stop_state: Arc<StopState>,
) {
	loop {
		if stop_state.is_stopped() {
			break;
		}
		for addr in &hosts {
			if stop_state.is_stopped() {
				break;
			}
			if peers.is_known(addr) {
				continue;
			}
			match connect_peer(*addr, Direction::Manual, &handshake, &adapter) {
				Ok(peer) => {
					peers.add_connected(peer.clone());
					if let Some(factory) = &sessions {
						factory.attach_manual_session(peer);
					}
				}
				Err(e) => debug!("Manual connect to {} failed: {:?}", addr, e),
			}
		}
		thread::sleep(Duration::from_secs(5));
	}
}

fn monitor_loop(peers: Arc<Peers>, stop_state: Arc<StopState>) {
	let mut ticks = 0u32;
	loop {
		if stop_state.is_stopped() {
			break;
		}
		thread::sleep(Duration::from_secs(1));
		ticks += 1;
		if ticks % 10 == 0 {
			peers.check_all();
		}
	}
}
