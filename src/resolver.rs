use std::net::{IpAddr, SocketAddr};

use anyhow::{anyhow, Result};
use tracing::debug;

/// Parse a server given as an IP literal.
///
/// Supports formats:
///   "1.1.1.1"              -- IPv4, uses `port`
///   "1.1.1.1:5353"         -- IPv4 with explicit port
///   "2606:4700::1111"      -- bare IPv6, uses `port`
///   "[2606:4700::1111]:53" -- bracketed IPv6 with port
///
/// Returns None when the input is not an address literal.
pub fn parse_server(input: &str, port: u16) -> Option<SocketAddr> {
	let trimmed = input.trim();
	if let Ok(addr) = trimmed.parse::<SocketAddr>() {
		return Some(addr);
	}
	// "[::1]" without a port
	let unbracketed = trimmed
		.strip_prefix('[')
		.and_then(|s| s.strip_suffix(']'))
		.unwrap_or(trimmed);
	unbracketed
		.parse::<IpAddr>()
		.ok()
		.map(|ip| SocketAddr::new(ip, port))
}

/// Resolve the probed server to a socket address.
///
/// Address literals are used directly; anything else is treated as a host
/// name and looked up once, taking the first address returned.
pub async fn resolve_server(input: &str, port: u16) -> Result<SocketAddr> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		return Err(anyhow!("empty server address"));
	}
	if let Some(addr) = parse_server(trimmed, port) {
		return Ok(addr);
	}

	let addr = tokio::net::lookup_host((trimmed, port))
		.await
		.map_err(|e| anyhow!("failed to resolve server '{}': {}", trimmed, e))?
		.next()
		.ok_or_else(|| anyhow!("server '{}' resolved to no addresses", trimmed))?;
	debug!(server = trimmed, %addr, "resolved server host name");
	Ok(addr)
}
