//! In-process background job scheduler.
//!
//! The worker runs on its own task and talks to the rest of the engine only
//! through channels: commands go in through a [`WorkerHandle`], and
//! [`WorkerEvent`]s come back out on an unbounded receiver. The receiver side
//! answers a `Process` event with [`WorkerHandle::complete`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::util::{due_at, duration_ms};

pub const DEFAULT_JOB_MAX_RETRIES: u32 = 3;
pub const DEFAULT_JOB_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJob {
    pub job_id: String,
    pub user_key: Option<String>,
    pub reason: Option<String>,
    /// Unix ms
    pub requested_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(serialize_with = "serialize_ms")]
    pub retry_delay: Duration,
}

/// Parameters for a new job; unset fields take the worker defaults
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub job_id: Option<String>,
    pub user_key: Option<String>,
    pub reason: Option<String>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    /// Wait before the first run
    pub delay: Option<Duration>,
}

impl JobRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_user(mut self, user_key: impl Into<String>) -> Self {
        self.user_key = Some(user_key.into());
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay = Some(retry_delay);
        self
    }
}

/// Announcement that a job will run again
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    pub job_id: String,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(serialize_with = "serialize_ms")]
    pub retry_delay: Duration,
    /// Unix ms
    pub next_run_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The job is due; reply with `complete`
    Process(BackgroundJob),
    Scheduled(RetryInfo),
}

#[derive(Debug)]
enum WorkerCommand {
    Enqueue { job: BackgroundJob, delay: Duration },
    Retry { job_id: String },
    Cancel { job_id: String },
    Complete { job_id: String, success: bool },
}

/// Cloneable sender side of the worker
#[derive(Clone)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WorkerHandle")
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

impl WorkerHandle {
    /// Queue a job and return its id.
    pub fn enqueue(&self, request: JobRequest) -> Result<String> {
        let job = BackgroundJob {
            job_id: request
                .job_id
                .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
            user_key: request.user_key,
            reason: request.reason,
            requested_at: self.clock.now_ms(),
            retry_count: request.retry_count.unwrap_or(0),
            max_retries: request.max_retries.unwrap_or(DEFAULT_JOB_MAX_RETRIES),
            retry_delay: request.retry_delay.unwrap_or(DEFAULT_JOB_RETRY_DELAY),
        };
        let job_id = job.job_id.clone();
        self.send(WorkerCommand::Enqueue {
            job,
            delay: request.delay.unwrap_or_default(),
        })?;
        Ok(job_id)
    }

    /// Run a known job again after its retry delay.
    pub fn retry(&self, job_id: impl Into<String>) -> Result<()> {
        self.send(WorkerCommand::Retry {
            job_id: job_id.into(),
        })
    }

    pub fn cancel(&self, job_id: impl Into<String>) -> Result<()> {
        self.send(WorkerCommand::Cancel {
            job_id: job_id.into(),
        })
    }

    /// Report the result of a `Process` event.
    pub fn complete(&self, job_id: impl Into<String>, success: bool) -> Result<()> {
        self.send(WorkerCommand::Complete {
            job_id: job_id.into(),
            success,
        })
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::InvalidState("background worker has stopped".into()))
    }
}

/// Job table and timers owned by the worker task
pub struct BackgroundWorker {
    jobs: HashMap<String, BackgroundJob>,
    timers: HashMap<String, Instant>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    clock: Arc<dyn Clock>,
}

impl BackgroundWorker {
    /// Start the worker task.
    ///
    /// The task stops once every handle is dropped or the event receiver is
    /// closed.
    pub fn spawn(
        clock: Arc<dyn Clock>,
    ) -> (
        WorkerHandle,
        mpsc::UnboundedReceiver<WorkerEvent>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker = Self {
            jobs: HashMap::new(),
            timers: HashMap::new(),
            events: event_tx,
            clock: Arc::clone(&clock),
        };
        let task = tokio::spawn(worker.run(command_rx));
        let handle = WorkerHandle {
            commands: command_tx,
            clock,
        };
        (handle, event_rx, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        info!("Background worker started");
        loop {
            let next_deadline = self.timers.values().min().copied();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                () = wait_until(next_deadline) => {
                    if !self.fire_due() {
                        break;
                    }
                }
            }
        }
        info!(jobs = self.jobs.len(), "Background worker stopped");
    }

    fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Enqueue { job, delay } => {
                debug!(job_id = %job.job_id, reason = ?job.reason, "Job enqueued");
                self.jobs.insert(job.job_id.clone(), job.clone());
                self.schedule(&job, delay);
            }
            WorkerCommand::Retry { job_id } => {
                if let Some(job) = self.jobs.get(&job_id).cloned() {
                    self.schedule(&job, job.retry_delay);
                }
            }
            WorkerCommand::Cancel { job_id } => {
                self.timers.remove(&job_id);
                if self.jobs.remove(&job_id).is_some() {
                    debug!(%job_id, "Job cancelled");
                }
            }
            WorkerCommand::Complete { job_id, success } => self.complete(&job_id, success),
        }
    }

    fn complete(&mut self, job_id: &str, success: bool) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };

        if success {
            debug!(job_id, "Job finished");
        } else if job.retry_count + 1 >= job.max_retries {
            warn!(
                job_id,
                retry_count = job.retry_count,
                max_retries = job.max_retries,
                "Job failed with no retries left"
            );
        } else {
            job.retry_count += 1;
            let job = job.clone();
            self.schedule(&job, job.retry_delay);
            return;
        }

        self.timers.remove(job_id);
        self.jobs.remove(job_id);
    }

    fn schedule(&mut self, job: &BackgroundJob, delay: Duration) {
        self.timers
            .insert(job.job_id.clone(), Instant::now() + delay);
        let next_run_at = due_at(self.clock.now_ms(), delay);
        self.emit(WorkerEvent::Scheduled(RetryInfo {
            job_id: job.job_id.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            retry_delay: job.retry_delay,
            next_run_at,
        }));
    }

    /// Emit `Process` for every expired timer. Returns false once nobody listens.
    fn fire_due(&mut self) -> bool {
        let now = Instant::now();
        let mut due: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(job_id, deadline)| (*deadline, job_id.clone()))
            .collect();
        due.sort();

        for (_, job_id) in due {
            self.timers.remove(&job_id);
            if let Some(job) = self.jobs.get(&job_id).cloned() {
                if !self.emit(WorkerEvent::Process(job)) {
                    return false;
                }
            }
        }
        true
    }

    fn emit(&self, event: WorkerEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn serialize_ms<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration_ms(*duration))
}
