use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::ValueEnum;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use crate::dns::{ReplyCheck, HEADER_LEN};
use crate::error::ProbeError;

/// Large enough for EDNS-extended replies
const MAX_UDP_REPLY: usize = 4096;

/// Datagrams that fail the reply check before the round trip is abandoned
const MAX_STRAY_REPLIES: usize = 3;

/// Socket type used to reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
	Udp,
	Tcp,
}

/// Resolution of recorded timing samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TimeUnit {
	#[default]
	#[value(name = "ms")]
	Millis,
	#[value(name = "us")]
	Micros,
}

impl TimeUnit {
	/// Whole units in `elapsed`, truncated.
	pub fn count(self, elapsed: Duration) -> u64 {
		let units = match self {
			TimeUnit::Millis => elapsed.as_millis(),
			TimeUnit::Micros => elapsed.as_micros(),
		};
		u64::try_from(units).unwrap_or(u64::MAX)
	}

	pub fn suffix(self) -> &'static str {
		match self {
			TimeUnit::Millis => "ms",
			TimeUnit::Micros => "us",
		}
	}
}

/// Where and how probe queries are sent
#[derive(Debug, Clone)]
pub struct TargetConfig {
	pub addr: SocketAddr,
	pub kind: TransportKind,
	pub reply_check: ReplyCheck,
}

/// Probe run configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
	/// Number of concurrent workers
	pub threads: usize,
	/// Sequential round trips per worker
	pub count: usize,
	/// Per round trip deadline; `None` waits forever
	pub timeout: Option<Duration>,
	pub unit: TimeUnit,
}

/// One exclusively owned connection to the probed server.
#[async_trait]
pub trait Session: Send {
	/// Send `message` and wait for a reply, returning the time from just
	/// before the send until the reply was read.
	async fn round_trip(
		&mut self,
		message: &[u8],
		timeout: Option<Duration>,
	) -> Result<Duration, ProbeError>;
}

enum Connection {
	Udp(UdpSocket),
	Tcp(TcpStream),
}

/// Session over a real UDP or TCP socket.
///
/// The socket is opened on the first round trip and reused afterwards.
/// A connection that fails mid-exchange is dropped so the next round trip
/// starts from a fresh one.
pub struct DnsSession {
	target: TargetConfig,
	conn: Option<Connection>,
}

impl DnsSession {
	pub fn new(target: TargetConfig) -> Self {
		DnsSession { target, conn: None }
	}

	async fn connect(&self, timeout: Option<Duration>) -> Result<Connection, ProbeError> {
		let addr = self.target.addr;
		let connect_err = |source: io::Error| ProbeError::Connect { addr, source };

		let conn = match self.target.kind {
			TransportKind::Udp => {
				let bind_addr = if addr.is_ipv4() {
					"0.0.0.0:0"
				} else {
					"[::]:0"
				};
				let socket = UdpSocket::bind(bind_addr).await.map_err(connect_err)?;
				// Connected so only datagrams from the server are received
				socket.connect(addr).await.map_err(connect_err)?;
				Connection::Udp(socket)
			}
			TransportKind::Tcp => {
				let stream = match with_deadline(timeout, TcpStream::connect(addr)).await {
					Some(result) => result.map_err(connect_err)?,
					None => {
						return Err(connect_err(io::Error::new(
							io::ErrorKind::TimedOut,
							"connect timed out",
						)));
					}
				};
				stream.set_nodelay(true).map_err(connect_err)?;
				Connection::Tcp(stream)
			}
		};

		debug!(server = %addr, kind = ?self.target.kind, "connection established");
		Ok(conn)
	}
}

#[async_trait]
impl Session for DnsSession {
	async fn round_trip(
		&mut self,
		message: &[u8],
		timeout: Option<Duration>,
	) -> Result<Duration, ProbeError> {
		let addr = self.target.addr;
		let check = self.target.reply_check;
		let expected_id = match message {
			[hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
			_ => 0,
		};

		let mut conn = match self.conn.take() {
			Some(conn) => conn,
			None => self.connect(timeout).await?,
		};

		let exchange = async {
			match &mut conn {
				Connection::Udp(socket) => {
					exchange_udp(socket, message, check, expected_id, addr).await
				}
				Connection::Tcp(stream) => {
					exchange_tcp(stream, message, check, expected_id, addr).await
				}
			}
		};
		let result = match with_deadline(timeout, exchange).await {
			Some(result) => result,
			None => Err(ProbeError::Timeout {
				addr,
				after: timeout.unwrap_or_default(),
			}),
		};

		if result.is_ok() {
			self.conn = Some(conn);
		}
		result
	}
}

/// Await `fut`, giving up after `timeout` if one is set.
async fn with_deadline<F: Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
	match timeout {
		Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
		None => Some(fut.await),
	}
}

async fn exchange_udp(
	socket: &UdpSocket,
	message: &[u8],
	check: ReplyCheck,
	expected_id: u16,
	addr: SocketAddr,
) -> Result<Duration, ProbeError> {
	// ICMP port unreachable surfaces as ConnectionRefused on a connected socket
	let io_err = |source: io::Error| match source.kind() {
		io::ErrorKind::ConnectionRefused => ProbeError::Connect { addr, source },
		_ => ProbeError::Io { addr, source },
	};
	let mut buf = vec![0u8; MAX_UDP_REPLY];

	let start = Instant::now();
	socket.send(message).await.map_err(io_err)?;

	let mut strays = 0;
	loop {
		let len = socket.recv(&mut buf).await.map_err(io_err)?;
		let elapsed = start.elapsed();

		let verdict = if len < HEADER_LEN {
			Err(format!("reply is {} bytes, shorter than a DNS header", len))
		} else {
			check.verify(&buf[..len], expected_id)
		};
		match verdict {
			Ok(()) => {
				trace!(server = %addr, bytes = len, ?elapsed, "UDP reply received");
				return Ok(elapsed);
			}
			Err(reason) => {
				strays += 1;
				debug!(server = %addr, %reason, "ignoring datagram");
				if strays >= MAX_STRAY_REPLIES {
					return Err(ProbeError::UnexpectedReply { addr, reason });
				}
			}
		}
	}
}

async fn exchange_tcp(
	stream: &mut TcpStream,
	message: &[u8],
	check: ReplyCheck,
	expected_id: u16,
	addr: SocketAddr,
) -> Result<Duration, ProbeError> {
	let io_err = |source: io::Error| ProbeError::Io { addr, source };

	// RFC 1035 4.2.2: two-byte length prefix
	let frame_len = u16::try_from(message.len()).map_err(|_| {
		ProbeError::Encoding(format!(
			"message of {} bytes is too large for TCP framing",
			message.len()
		))
	})?;
	let mut frame = Vec::with_capacity(message.len() + 2);
	frame.extend_from_slice(&frame_len.to_be_bytes());
	frame.extend_from_slice(message);

	let start = Instant::now();
	stream.write_all(&frame).await.map_err(io_err)?;

	let mut len_buf = [0u8; 2];
	stream.read_exact(&mut len_buf).await.map_err(io_err)?;
	let reply_len = u16::from_be_bytes(len_buf) as usize;
	let mut reply = vec![0u8; reply_len];
	stream.read_exact(&mut reply).await.map_err(io_err)?;
	let elapsed = start.elapsed();

	if reply_len < HEADER_LEN {
		return Err(ProbeError::UnexpectedReply {
			addr,
			reason: format!("reply is {} bytes, shorter than a DNS header", reply_len),
		});
	}
	check
		.verify(&reply, expected_id)
		.map_err(|reason| ProbeError::UnexpectedReply { addr, reason })?;

	trace!(server = %addr, bytes = reply_len, ?elapsed, "TCP reply received");
	Ok(elapsed)
}
