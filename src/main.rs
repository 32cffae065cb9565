mod cli;
mod dns;
mod error;
mod output;
mod probe;
mod resolver;
mod stats;
mod transport;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::dns::{Query, Question};
use crate::transport::{DnsSession, TargetConfig};

fn init_logging(default_level: &str) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_level));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_logging(cli.log_level());

	let addr = resolver::resolve_server(&cli.server, cli.port).await?;
	let target = TargetConfig {
		addr,
		kind: cli.protocol,
		reply_check: cli.reply_check(),
	};
	let config = cli.probe_config();

	// Build the query once; every worker sends these exact bytes
	let id = cli.id.unwrap_or_else(rand::random);
	let name = dns::query_name(&cli.domain, cli.query_type);
	let mut query = Query::new(id, Question::new(name, cli.query_type));
	query.header.recursion_desired = !cli.no_recursion;
	let message = query
		.encode()
		.with_context(|| format!("cannot build a query for '{}'", cli.domain))?;
	debug!(id = message.id(), bytes = message.len(), "query encoded");

	output::print_config_summary(&target, &cli.domain, cli.query_type, &config);

	let outcome = probe::run_probe(&message, &config, |_| DnsSession::new(target.clone()))
		.await
		.with_context(|| format!("probing {} failed", target.addr))?;
	let summary = stats::summarize(&cli.domain, &outcome.samples)?;

	if outcome.is_partial() {
		warn!(
			failed_workers = outcome.failures.len(),
			samples = outcome.samples.len(),
			"some queries failed, summary covers successful round trips only",
		);
	}

	output::print_summary(&summary, &outcome, config.unit);

	if let Some(path) = &cli.output {
		output::write_csv(path, &summary, &outcome, config.unit)?;
	}

	Ok(())
}
