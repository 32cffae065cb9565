use std::time::Duration;

use clap::Parser;

use crate::dns::{QueryType, ReplyCheck};
use crate::transport::{ProbeConfig, TimeUnit, TransportKind};

/// DNS lookup latency probe
#[derive(Parser, Debug)]
#[command(name = "dns-lookup-probe", version)]
#[command(about = "Measure DNS lookup latency against a single server")]
pub struct Cli {
	/// DNS server (IP address, [IPv6]:port, or host name)
	#[arg(short = 's', long = "server", default_value = "8.8.8.8")]
	pub server: String,

	/// DNS server port
	#[arg(short = 'p', long = "port", default_value = "53",
		value_parser = clap::value_parser!(u16).range(1..))]
	pub port: u16,

	/// Domain name to query (an IP address is accepted for PTR)
	#[arg(short = 'd', long = "domain")]
	pub domain: String,

	/// Record type: a, ptr, txt or cname
	#[arg(short = 't', long = "type", default_value = "a")]
	pub query_type: QueryType,

	/// Queries per worker
	#[arg(short = 'n', long = "count", default_value = "3",
		value_parser = clap::value_parser!(u32).range(1..))]
	pub count: u32,

	/// Per-query timeout in milliseconds (0 waits forever)
	#[arg(long = "timeout", default_value = "2000")]
	pub timeout: u64,

	/// Transport protocol
	#[arg(long = "protocol", value_enum, default_value = "udp")]
	pub protocol: TransportKind,

	/// Number of concurrent workers
	#[arg(long = "threads", default_value = "1",
		value_parser = clap::value_parser!(u32).range(1..))]
	pub threads: u32,

	/// Fixed query ID (random when omitted)
	#[arg(long = "id")]
	pub id: Option<u16>,

	/// Clear the recursion-desired flag
	#[arg(long = "no-recursion")]
	pub no_recursion: bool,

	/// Unit of recorded latencies
	#[arg(long = "unit", value_enum, default_value = "ms")]
	pub unit: TimeUnit,

	/// Only count replies that carry the query ID and the response flag
	#[arg(long = "validate-reply")]
	pub validate_reply: bool,

	/// Output CSV file path
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,

	/// Enable debug logging
	#[arg(long = "debug")]
	pub debug: bool,

	/// With --debug, log every round trip
	#[arg(long = "verbose")]
	pub verbose: bool,
}

impl Cli {
	pub fn probe_config(&self) -> ProbeConfig {
		ProbeConfig {
			threads: self.threads as usize,
			count: self.count as usize,
			timeout: match self.timeout {
				0 => None,
				ms => Some(Duration::from_millis(ms)),
			},
			unit: self.unit,
		}
	}

	pub fn reply_check(&self) -> ReplyCheck {
		if self.validate_reply {
			ReplyCheck::Header
		} else {
			ReplyCheck::None
		}
	}

	/// Default log filter when RUST_LOG is not set
	pub fn log_level(&self) -> &'static str {
		match (self.debug, self.verbose) {
			(true, true) => "trace",
			(true, false) => "debug",
			_ => "warn",
		}
	}
}
