use crate::error::ProbeError;

/// Percentiles reported for every run
pub const P95: u64 = 95;
pub const P99: u64 = 99;

/// Latency summary of one probe run, in the run's time unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
	/// Queried domain the run is reported under
	pub name: String,
	pub count: usize,
	pub min: u64,
	pub max: u64,
	/// Truncating integer mean
	pub avg: u64,
	pub p95: u64,
	pub p99: u64,
}

/// A named group of metric series, one per summary field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDefinition {
	pub key: &'static str,
	pub label: String,
	pub metrics: Vec<&'static str>,
}

impl Summary {
	/// Metric name and value pairs, in reporting order.
	pub fn metrics(&self) -> [(&'static str, f64); 5] {
		[
			("min", self.min as f64),
			("max", self.max as f64),
			("avg", self.avg as f64),
			("p95", self.p95 as f64),
			("p99", self.p99 as f64),
		]
	}

	/// Graph label derived from the domain, e.g. `dns-example-com`.
	pub fn graph_label(&self) -> String {
		format!("dns-{}", self.name.trim_end_matches('.').replace('.', "-"))
	}

	pub fn graph_definition(&self) -> GraphDefinition {
		GraphDefinition {
			key: "response",
			label: self.graph_label(),
			metrics: self.metrics().iter().map(|(name, _)| *name).collect(),
		}
	}
}

/// Nearest-rank percentile of an ascending slice, without interpolation.
///
/// The zero-based index is `floor(len * p / 100) - 1`. When that index
/// would be negative the result is 0.
pub fn percentile(sorted_values: &[u64], p: u64) -> u64 {
	let rank = (sorted_values.len() as u64 * p / 100).min(sorted_values.len() as u64);
	match rank.checked_sub(1) {
		Some(index) => sorted_values[index as usize],
		None => 0,
	}
}

/// Reduce a complete sample set to its summary.
///
/// A single sample is its own min, max, mean and percentiles.
pub fn summarize(name: &str, samples: &[u64]) -> Result<Summary, ProbeError> {
	if samples.is_empty() {
		return Err(ProbeError::EmptySample("sample set is empty".to_string()));
	}

	let mut sorted = samples.to_vec();
	sorted.sort_unstable();

	let count = sorted.len();
	let min = sorted[0];
	let max = sorted[count - 1];
	let sum: u128 = sorted.iter().map(|&v| v as u128).sum();
	let avg = (sum / count as u128) as u64;

	let (p95, p99) = if count == 1 {
		(min, min)
	} else {
		(percentile(&sorted, P95), percentile(&sorted, P99))
	};

	Ok(Summary {
		name: name.to_string(),
		count,
		min,
		max,
		avg,
		p95,
		p99,
	})
}
