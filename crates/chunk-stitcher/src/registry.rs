//! Process-wide job bookkeeping: cooperative cancellation flags, lifecycle
//! stages, and the OS pids spawned on a job's behalf.
//!
//! The registry is an explicit shared handle, not a global. Every clone sees
//! the same map; the service owns one and passes it to each job.

use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle stage of one registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
	Registered,
	Running,
	Cancelled,
	Completed,
	Failed,
}

#[derive(Debug)]
struct JobEntry {
	token: CancellationToken,
	stage: JobStage,
	pids: HashSet<i32>,
}

/// Snapshot of one job's registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
	pub stage: JobStage,
	pub cancelled: bool,
	pub tracked_pids: usize,
}

/// Shared map from job id to cancellation state and tracked pids.
///
/// Mutated concurrently by a job's own chunk workers (`track_pid`) and by
/// external cancelling callers (`mark_cancelled`); all operations take the
/// map lock for the duration of one small update.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
	jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
}

impl CancellationRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
		self.jobs.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Register a job and hand back its cancellation token.
	///
	/// Idempotent by job id: re-registering returns the existing token
	/// untouched.
	pub fn register(&self, job_id: &str) -> CancellationToken {
		let mut jobs = self.lock();
		let entry = jobs.entry(job_id.to_string()).or_insert_with(|| {
			debug!(job_id, "job registered");
			JobEntry {
				token: CancellationToken::new(),
				stage: JobStage::Registered,
				pids: HashSet::new(),
			}
		});

		entry.token.clone()
	}

	/// Move a registered job to a new lifecycle stage. Unknown ids are a
	/// no-op.
	pub fn set_stage(&self, job_id: &str, stage: JobStage) {
		if let Some(entry) = self.lock().get_mut(job_id) {
			entry.stage = stage;
		}
	}

	/// Request cooperative cancellation of a job.
	///
	/// Returns `false` when the job is not registered (already finished or
	/// never started) — "nothing to cancel", not an error.
	pub fn mark_cancelled(&self, job_id: &str) -> bool {
		let mut jobs = self.lock();
		let Some(entry) = jobs.get_mut(job_id) else {
			debug!(job_id, "cancel requested for unknown job");
			return false;
		};

		entry.stage = JobStage::Cancelled;
		entry.token.cancel();
		info!(job_id, "job marked cancelled");

		true
	}

	/// Record an OS process spawned while handling this job. Unknown ids are
	/// a no-op.
	pub fn track_pid(&self, job_id: &str, pid: i32) {
		if let Some(entry) = self.lock().get_mut(job_id) {
			entry.pids.insert(pid);
			debug!(job_id, pid, "tracking spawned process");
		}
	}

	/// Send SIGTERM to every process tracked for this job.
	///
	/// Last-resort path for when cooperative cancellation is not enough.
	/// A pid that is already gone or not killable counts as not killed;
	/// the call always returns a count and never fails.
	pub fn kill_processes(&self, job_id: &str) -> usize {
		let pids: Vec<i32> = match self.lock().get(job_id) {
			Some(entry) => entry.pids.iter().copied().collect(),
			None => return 0,
		};

		let mut killed = 0;
		for pid in pids {
			if terminate(pid) {
				killed += 1;
			} else {
				warn!(job_id, pid, "process not killed (already gone or not permitted)");
			}
		}

		info!(job_id, killed, "terminated tracked processes");
		killed
	}

	/// Remove a job's entry. Subsequent lookups report "not found".
	pub fn unregister(&self, job_id: &str) {
		if self.lock().remove(job_id).is_some() {
			debug!(job_id, "job unregistered");
		}
	}

	pub fn is_active(&self, job_id: &str) -> bool {
		self.lock().contains_key(job_id)
	}

	pub fn task_info(&self, job_id: &str) -> Option<TaskInfo> {
		self.lock().get(job_id).map(|entry| TaskInfo {
			stage: entry.stage,
			cancelled: entry.token.is_cancelled(),
			tracked_pids: entry.pids.len(),
		})
	}

	pub fn active_jobs(&self) -> usize {
		self.lock().len()
	}
}

#[cfg(unix)]
fn terminate(pid: i32) -> bool {
	// ESRCH (gone) and EPERM (not ours) both come back as -1.
	unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn terminate(_pid: i32) -> bool {
	false
}

/// Service-wide ceiling on whole jobs running at once, independent of the
/// per-job chunk worker pool.
#[derive(Clone)]
pub struct JobSemaphore {
	slots: Arc<Semaphore>,
}

impl JobSemaphore {
	pub fn new(max_jobs: usize) -> Self {
		Self {
			slots: Arc::new(Semaphore::new(max_jobs)),
		}
	}

	/// Block until a job slot is free. The permit releases itself on drop,
	/// on every exit path.
	pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
		Arc::clone(&self.slots).acquire_owned().await.map_err(PipelineError::from)
	}

	pub fn available(&self) -> usize {
		self.slots.available_permits()
	}
}
