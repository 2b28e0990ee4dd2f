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

//! Provides a connection wrapper that handles the lower level tasks in
//! sending or receiving data from the TCP socket, as well as dealing with
//! timeouts. Each connection spawns a reader and a writer thread; messages
//! produced by the protocol handler travel out through the same buffered
//! channel the owning peer sends on.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::prelude::{DateTime, Utc};

use bitnode_util::{RateCounter, RwLock};

use crate::msg::{read_message, write_message, Message};
use crate::types::{Error, SEND_CHANNEL_CAP};

/// A handler for incoming messages on a connection. Replies returned from
/// `consume` are queued on the connection's send channel. An error drops
/// the connection.
pub trait MessageHandler: Send + 'static {
	/// Handle one incoming message, optionally producing replies.
	fn consume(&self, msg: Message) -> Result<Vec<Message>, Error>;
}

/// One live TCP connection with its reader and writer threads.
pub struct Conn {
	/// Address of the remote end
	pub addr: SocketAddr,
	send_tx: mpsc::SyncSender<Message>,
	stream: TcpStream,
	alive: Arc<AtomicBool>,
	last_seen: Arc<RwLock<DateTime<Utc>>>,
	received: Arc<RwLock<RateCounter>>,
	sent: Arc<RwLock<RateCounter>>,
}

impl Conn {
	/// Queues a message for delivery to the remote end. Fails when the
	/// connection died or the peer is too slow draining its channel.
	pub fn send(&self, msg: Message) -> Result<(), Error> {
		if !self.alive.load(Ordering::Relaxed) {
			return Err(Error::PeerNotConnected);
		}
		self.send_tx
			.try_send(msg)
			.map_err(|_| Error::ConnectionClose)
	}

	/// Whether both connection threads are still serving the socket.
	pub fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Relaxed)
	}

	/// When we last received anything from the remote end.
	pub fn last_seen(&self) -> DateTime<Utc> {
		*self.last_seen.read()
	}

	/// Bytes received from the remote end over the last minute.
	pub fn received_bytes_per_min(&self) -> u64 {
		self.received.read().bytes_per_min()
	}

	/// Bytes sent to the remote end over the last minute.
	pub fn sent_bytes_per_min(&self) -> u64 {
		self.sent.read().bytes_per_min()
	}

	/// Shuts the socket down, unblocking both threads.
	pub fn close(&self) {
		self.alive.store(false, Ordering::Relaxed);
		let _ = self.stream.shutdown(Shutdown::Both);
	}
}

impl Drop for Conn {
	fn drop(&mut self) {
		self.close();
	}
}

/// Starts serving the stream: spawns the reader thread feeding the handler
/// and the writer thread draining the send channel.
pub fn listen<H: MessageHandler>(
	stream: TcpStream,
	addr: SocketAddr,
	handler: H,
) -> Result<Conn, Error> {
	let (send_tx, send_rx) = mpsc::sync_channel::<Message>(SEND_CHANNEL_CAP);
	let alive = Arc::new(AtomicBool::new(true));
	let last_seen = Arc::new(RwLock::new(Utc::now()));
	let received = Arc::new(RwLock::new(RateCounter::new()));
	let sent = Arc::new(RwLock::new(RateCounter::new()));

	let conn = Conn {
		addr,
		send_tx: send_tx.clone(),
		stream: stream.try_clone()?,
		alive: alive.clone(),
		last_seen: last_seen.clone(),
		received: received.clone(),
		sent: sent.clone(),
	};

	let mut reader_stream = stream.try_clone()?;
	let reader_alive = alive.clone();
	let reader_reply_tx = send_tx;
	thread::Builder::new()
		.name("peer_read".to_string())
		.spawn(move || {
			while reader_alive.load(Ordering::Relaxed) {
				match read_message(&mut reader_stream) {
					Ok((msg, size)) => {
						*last_seen.write() = Utc::now();
						received.write().inc(size as u64);
						match handler.consume(msg) {
							Ok(replies) => {
								for reply in replies {
									// never block the read loop on a slow
									// writer, drop the reply instead
									if reader_reply_tx.try_send(reply).is_err() {
										break;
									}
								}
							}
							Err(e) => {
								debug!("{}: dropping connection: {:?}", addr, e);
								break;
							}
						}
					}
					Err(e) => {
						trace!("{}: read side closing: {:?}", addr, e);
						break;
					}
				}
			}
			reader_alive.store(false, Ordering::Relaxed);
			let _ = reader_stream.shutdown(Shutdown::Both);
		})?;

	let mut writer_stream = stream;
	let writer_alive = alive;
	thread::Builder::new()
		.name("peer_write".to_string())
		.spawn(move || {
			while writer_alive.load(Ordering::Relaxed) {
				match send_rx.recv_timeout(Duration::from_secs(1)) {
					Ok(msg) => match write_message(&mut writer_stream, &msg) {
						Ok(size) => sent.write().inc(size as u64),
						Err(e) => {
							trace!("{}: write side closing: {:?}", addr, e);
							break;
						}
					},
					Err(mpsc::RecvTimeoutError::Timeout) => (),
					Err(mpsc::RecvTimeoutError::Disconnected) => break,
				}
			}
			writer_alive.store(false, Ordering::Relaxed);
			let _ = writer_stream.shutdown(Shutdown::Both);
		})?;

	Ok(conn)
}
