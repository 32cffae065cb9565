use comfy_table::{Table, ContentArrangement, presets::UTF8_FULL};

use anyhow::Result;

use crate::dns::QueryType;
use crate::error::ProbeError;
use crate::probe::ProbeOutcome;
use crate::stats::Summary;
use crate::transport::{ProbeConfig, TargetConfig, TimeUnit};

/// Print a summary of the probe configuration before running.
pub fn print_config_summary(
	target: &TargetConfig,
	domain: &str,
	query_type: QueryType,
	config: &ProbeConfig,
) {
	println!("DNS Lookup Probe Configuration");
	println!("==============================");
	println!("Server:         {} ({:?})", target.addr, target.kind);
	println!("Domain:         {} ({})", domain, query_type);
	println!("Workers:        {}", config.threads);
	println!("Queries/worker: {}", config.count);
	println!("Timeout:        {}", format_timeout(config));
	println!("Unit:           {}", config.unit.suffix());
	println!();
}

fn format_timeout(config: &ProbeConfig) -> String {
	match config.timeout {
		Some(limit) => format!("{} ms", limit.as_millis()),
		None => "none".to_string(),
	}
}

/// Short classification of a worker error for display
fn error_kind(error: &ProbeError) -> &'static str {
	if error.is_timeout() {
		"timeout"
	} else if error.is_connect() {
		"connect"
	} else {
		match error {
			ProbeError::UnexpectedReply { .. } => "reply",
			ProbeError::Worker { .. } => "aborted",
			_ => "io",
		}
	}
}

/// Print the latency summary, followed by any failed workers.
pub fn print_summary(summary: &Summary, outcome: &ProbeOutcome, unit: TimeUnit) {
	let graph = summary.graph_definition();

	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec!["Metric", "Value"]);
	for (series, (_, value)) in graph.metrics.iter().zip(summary.metrics()) {
		table.add_row(vec![
			format!("{}.{}", graph.key, series),
			format!("{} {}", value, unit.suffix()),
		]);
	}

	println!("\n{} ({} samples)", graph.label, summary.count);
	println!("{}\n", "=".repeat(graph.label.len()));
	println!("{table}");

	if outcome.is_partial() {
		let mut failures = Table::new();
		failures.load_preset(UTF8_FULL);
		failures.set_content_arrangement(ContentArrangement::Dynamic);
		failures.set_header(vec!["Worker", "Completed", "Kind", "Error"]);
		for f in &outcome.failures {
			failures.add_row(vec![
				f.index.to_string(),
				f.completed.to_string(),
				error_kind(&f.error).to_string(),
				f.error.to_string(),
			]);
		}
		println!(
			"\nPartial result: {} of {} worker(s) failed",
			outcome.failures.len(), outcome.workers,
		);
		println!("{failures}");
	}
}

/// Write the summary as a single CSV row.
pub fn write_csv(path: &str, summary: &Summary, outcome: &ProbeOutcome, unit: TimeUnit) -> Result<()> {
	let mut writer = csv::Writer::from_path(path)?;

	writer.write_record([
		"graph", "domain", "unit", "samples", "workers", "failed_workers",
		"min", "max", "avg", "p95", "p99",
	])?;

	writer.write_record([
		summary.graph_label(),
		summary.name.clone(),
		unit.suffix().to_string(),
		summary.count.to_string(),
		outcome.workers.to_string(),
		outcome.failures.len().to_string(),
		summary.min.to_string(),
		summary.max.to_string(),
		summary.avg.to_string(),
		summary.p95.to_string(),
		summary.p99.to_string(),
	])?;

	writer.flush()?;
	println!("\nResults written to: {}", path);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::probe::WorkerFailure;
	use crate::stats::summarize;
	use std::time::Duration;

	#[test]
	fn test_format_timeout() {
		let mut config = ProbeConfig {
			threads: 1,
			count: 3,
			timeout: Some(Duration::from_millis(1500)),
			unit: TimeUnit::Millis,
		};
		assert_eq!(format_timeout(&config), "1500 ms");
		config.timeout = None;
		assert_eq!(format_timeout(&config), "none");
	}

	#[test]
	fn test_error_kind() {
		let addr = "127.0.0.1:53".parse().unwrap();
		let timeout = ProbeError::Timeout { addr, after: Duration::from_millis(5) };
		assert_eq!(error_kind(&timeout), "timeout");
		let reply = ProbeError::UnexpectedReply { addr, reason: "x".to_string() };
		assert_eq!(error_kind(&reply), "reply");
		let aborted = ProbeError::Worker { index: 0, reason: "panic".to_string() };
		assert_eq!(error_kind(&aborted), "aborted");
	}

	#[test]
	fn test_write_csv() {
		let summary = summarize("example.com", &[5, 7, 6, 9]).unwrap();
		let outcome = ProbeOutcome {
			samples: vec![5, 7, 6, 9],
			failures: vec![WorkerFailure {
				index: 1,
				completed: 1,
				error: ProbeError::Worker { index: 1, reason: "test".to_string() },
			}],
			workers: 2,
		};
		let path = std::env::temp_dir().join(format!("dns-lookup-probe-{}.csv", std::process::id()));
		let path_str = path.to_str().unwrap();

		write_csv(path_str, &summary, &outcome, TimeUnit::Millis).unwrap();
		let content = std::fs::read_to_string(&path).unwrap();
		std::fs::remove_file(&path).unwrap();

		let mut lines = content.lines();
		assert_eq!(
			lines.next(),
			Some("graph,domain,unit,samples,workers,failed_workers,min,max,avg,p95,p99")
		);
		assert_eq!(lines.next(), Some("dns-example-com,example.com,ms,4,2,1,5,9,6,7,7"));
		assert_eq!(lines.next(), None);
	}
}
