use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while encoding, sending, or summarizing DNS probes
#[derive(Error, Debug)]
pub enum ProbeError {
	#[error("invalid query: {0}")]
	Encoding(String),

	#[error("failed to connect to {addr}: {source}")]
	Connect {
		addr: SocketAddr,
		#[source]
		source: io::Error,
	},

	#[error("no reply from {addr} within {} ms", .after.as_millis())]
	Timeout {
		addr: SocketAddr,
		after: Duration,
	},

	#[error("I/O error talking to {addr}: {source}")]
	Io {
		addr: SocketAddr,
		#[source]
		source: io::Error,
	},

	#[error("unexpected reply from {addr}: {reason}")]
	UnexpectedReply {
		addr: SocketAddr,
		reason: String,
	},

	#[error("worker {index} did not complete: {reason}")]
	Worker {
		index: usize,
		reason: String,
	},

	#[error("no timing samples collected: {0}")]
	EmptySample(String),
}

impl ProbeError {
	pub fn is_timeout(&self) -> bool {
		matches!(self, ProbeError::Timeout { .. })
	}

	pub fn is_connect(&self) -> bool {
		matches!(self, ProbeError::Connect { .. })
	}
}
