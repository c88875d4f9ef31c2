//! In-memory registry of long-running jobs and their output.
//!
//! Each job owns an append-only line buffer. Subscribers receive the buffered
//! history followed by live lines and a final [`JobEvent::Done`]; the backlog
//! is captured under the same lock that guards appends, so nothing is lost or
//! repeated between the two.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use devboard_common::{Job, JobKind, JobStatus};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::errors::DashboardError;

/// Cancellation handle for a spawned process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, kill_tx: oneshot::Sender<()>) -> Self {
        Self {
            pid,
            kill_tx: Some(kill_tx),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to terminate. Returns false if it already exited.
    pub fn kill(mut self) -> bool {
        self.kill_tx.take().is_some_and(|tx| tx.send(()).is_ok())
    }
}

/// Events delivered to output subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Line(String),
    Done { status: JobStatus },
}

struct JobRecord {
    job: Job,
    process: Option<ProcessHandle>,
    subscribers: Vec<mpsc::UnboundedSender<JobEvent>>,
}

impl JobRecord {
    fn finalize(&mut self, status: JobStatus) {
        self.job.status = status;
        self.job.updated_at = Utc::now();
        self.process = None;
        for tx in self.subscribers.drain(..) {
            let _ = tx.send(JobEvent::Done { status });
        }
    }
}

#[derive(Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_job(&self, kind: JobKind, target: &str) -> Job {
        let now = Utc::now();
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target: target.to_string(),
            status: JobStatus::Pending,
            output: Vec::new(),
            error: None,
            exit_code: None,
            created_at: now,
            updated_at: now,
        };
        info!(job_id = %job.id, kind = %kind, target, "job created");
        self.lock().insert(
            job.id.clone(),
            JobRecord {
                job: job.clone(),
                process: None,
                subscribers: Vec::new(),
            },
        );
        job
    }

    /// Attach a process handle. A job that already finished gets its process killed instead.
    pub fn register_process(&self, job_id: &str, handle: ProcessHandle) {
        let mut jobs = self.lock();
        match jobs.get_mut(job_id) {
            Some(record) if !record.job.status.is_terminal() => {
                debug!(job_id, pid = ?handle.pid(), "process registered");
                record.process = Some(handle);
            }
            _ => {
                debug!(job_id, "job no longer active, killing late process");
                handle.kill();
            }
        }
    }

    pub fn unregister_process(&self, job_id: &str) {
        if let Some(record) = self.lock().get_mut(job_id) {
            record.process = None;
        }
    }

    /// Append one output line. Returns false if the job is unknown or finished.
    pub fn append_output(&self, job_id: &str, line: String) -> bool {
        let mut jobs = self.lock();
        let Some(record) = jobs.get_mut(job_id) else {
            return false;
        };
        if record.job.status.is_terminal() {
            return false;
        }
        record
            .subscribers
            .retain(|tx| tx.send(JobEvent::Line(line.clone())).is_ok());
        record.job.output.push(line);
        record.job.updated_at = Utc::now();
        true
    }

    /// Move a job to `status`. Ignored (returns false) once the job is terminal.
    pub fn update_status(&self, job_id: &str, status: JobStatus, error: Option<String>) -> bool {
        let mut jobs = self.lock();
        let Some(record) = jobs.get_mut(job_id) else {
            warn!(job_id, "status update for unknown job");
            return false;
        };
        if record.job.status.is_terminal() {
            return false;
        }
        if status == JobStatus::Failed {
            record.job.error = error;
        }
        if status.is_terminal() {
            info!(job_id, status = %status, "job finished");
            record.finalize(status);
        } else {
            record.job.status = status;
            record.job.updated_at = Utc::now();
        }
        true
    }

    pub fn set_exit_code(&self, job_id: &str, code: i32) {
        if let Some(record) = self.lock().get_mut(job_id) {
            record.job.exit_code = Some(code);
        }
    }

    /// Kill the job's process, if any, and mark it cancelled.
    pub fn cancel(&self, job_id: &str) -> Result<Job, DashboardError> {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| DashboardError::JobNotFound {
                id: job_id.to_string(),
            })?;
        if let Some(handle) = record.process.take() {
            debug!(job_id, pid = ?handle.pid(), "killing process");
            handle.kill();
        }
        if !record.job.status.is_terminal() {
            info!(job_id, "job cancelled");
            record.finalize(JobStatus::Cancelled);
        }
        Ok(record.job.clone())
    }

    /// Stream of the job's output: buffered history, then live lines, then `Done`.
    pub fn subscribe(
        &self,
        job_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<JobEvent>, DashboardError> {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| DashboardError::JobNotFound {
                id: job_id.to_string(),
            })?;
        let (tx, rx) = mpsc::unbounded_channel();
        for line in &record.job.output {
            let _ = tx.send(JobEvent::Line(line.clone()));
        }
        if record.job.status.is_terminal() {
            let _ = tx.send(JobEvent::Done {
                status: record.job.status,
            });
        } else {
            record.subscribers.push(tx);
        }
        Ok(rx)
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.lock().get(job_id).map(|r| r.job.clone())
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().map(|r| r.job.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn has_process(&self, job_id: &str) -> bool {
        self.lock()
            .get(job_id)
            .is_some_and(|r| r.process.is_some())
    }
}
