use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::dns::EncodedMessage;
use crate::error::ProbeError;
use crate::transport::{ProbeConfig, Session, TimeUnit};

/// Lifecycle of a single probe worker
#[derive(Debug)]
pub enum WorkerState {
	Idle,
	Running,
	Done,
	Failed(ProbeError),
}

/// What a worker hands back at the join barrier
#[derive(Debug)]
struct WorkerReport {
	index: usize,
	samples: Vec<u64>,
	state: WorkerState,
}

/// A worker that stopped before finishing its iterations
#[derive(Debug)]
pub struct WorkerFailure {
	pub index: usize,
	/// Round trips that succeeded before the failure
	pub completed: usize,
	pub error: ProbeError,
}

/// Merged result of a probe run with at least one sample
#[derive(Debug)]
pub struct ProbeOutcome {
	/// Samples in worker-index, then iteration order
	pub samples: Vec<u64>,
	pub failures: Vec<WorkerFailure>,
	pub workers: usize,
}

impl ProbeOutcome {
	/// True when some iterations failed but samples were still collected.
	pub fn is_partial(&self) -> bool {
		!self.failures.is_empty()
	}
}

/// Run `count` sequential round trips in one worker.
///
/// Stops at the first failure, keeping the samples gathered so far.
async fn run_worker<S: Session>(
	index: usize,
	mut session: S,
	message: EncodedMessage,
	count: usize,
	timeout: Option<Duration>,
	unit: TimeUnit,
) -> WorkerReport {
	let mut state = WorkerState::Idle;
	let mut samples = Vec::with_capacity(count);
	trace!(worker = index, ?state, "worker starting");

	for iteration in 0..count {
		state = WorkerState::Running;
		trace!(worker = index, ?state, completed = samples.len(), "sending query");

		match session.round_trip(&message, timeout).await {
			Ok(elapsed) => {
				trace!(worker = index, iteration, ?elapsed, "round trip complete");
				samples.push(unit.count(elapsed));
			}
			Err(e) => {
				warn!(
					worker = index,
					iteration,
					retained = samples.len(),
					error = %e,
					"worker stopped early",
				);
				return WorkerReport {
					index,
					samples,
					state: WorkerState::Failed(e),
				};
			}
		}
	}

	state = WorkerState::Done;
	debug!(worker = index, ?state, samples = samples.len(), "worker finished");
	WorkerReport { index, samples, state }
}

/// Fan `config.threads` workers out over their own sessions and merge their
/// samples once every worker has finished.
///
/// `make_session` is called once per worker index. Per-worker failures are
/// reported in the outcome; the run only fails when no worker produced a
/// single sample.
pub async fn run_probe<S, F>(
	message: &EncodedMessage,
	config: &ProbeConfig,
	mut make_session: F,
) -> Result<ProbeOutcome, ProbeError>
where
	S: Session + 'static,
	F: FnMut(usize) -> S,
{
	let workers = config.threads;
	info!(workers, count = config.count, "starting probe");

	// One slot per worker, each writes exactly once
	let (tx, mut rx) = mpsc::channel::<WorkerReport>(workers.max(1));
	let mut handles = Vec::with_capacity(workers);

	for index in 0..workers {
		let session = make_session(index);
		let tx = tx.clone();
		let message = message.clone();
		let count = config.count;
		let timeout = config.timeout;
		let unit = config.unit;

		handles.push(tokio::spawn(async move {
			let report = run_worker(index, session, message, count, timeout, unit).await;
			let _ = tx.send(report).await;
		}));
	}
	drop(tx);

	// Join barrier: reports are only read after every worker has exited
	let mut failures = Vec::new();
	for (index, handle) in handles.into_iter().enumerate() {
		if let Err(e) = handle.await {
			warn!(worker = index, error = %e, "worker task aborted");
			failures.push(WorkerFailure {
				index,
				completed: 0,
				error: ProbeError::Worker { index, reason: e.to_string() },
			});
		}
	}

	let mut reports = Vec::with_capacity(workers);
	while let Some(report) = rx.recv().await {
		reports.push(report);
	}
	reports.sort_by_key(|r| r.index);

	let mut samples = Vec::with_capacity(workers * config.count);
	for report in reports {
		let completed = report.samples.len();
		samples.extend(report.samples);
		if let WorkerState::Failed(error) = report.state {
			failures.push(WorkerFailure { index: report.index, completed, error });
		}
	}
	failures.sort_by_key(|f| f.index);

	if samples.is_empty() {
		let cause = failures
			.first()
			.map(|f| f.error.to_string())
			.unwrap_or_else(|| "no round trips were attempted".to_string());
		return Err(ProbeError::EmptySample(format!(
			"all {} worker(s) failed, first error: {}",
			workers, cause
		)));
	}

	info!(
		samples = samples.len(),
		failed_workers = failures.len(),
		"probe finished",
	);
	Ok(ProbeOutcome { samples, failures, workers })
}
