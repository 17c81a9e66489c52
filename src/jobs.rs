//! Asynchronous render jobs.
//!
//! [`JobBoard`] is the in-process job queue: a priority heap drained by a
//! fixed pool of worker threads. Job state lives in a map keyed by job id,
//! and every transition is published on the `job:{id}` channel of a
//! [`PubSub`] so callers can follow a job without polling. Only the most
//! recent finished jobs are kept; older ones are forgotten in the order
//! they finished.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::RenderResponseEnvelope;
use crate::error::{HandlerError, JobError, RenderError};
use crate::handler::{CacheCheck, PreparedRequest, RenderRequestHandler};
use crate::render::CancelToken;
use crate::request::RawRequest;

/// Priority used when a submission does not name one.
pub const DEFAULT_PRIORITY: u8 = 5;
/// Finished jobs kept for status and result lookups.
pub const DEFAULT_RETAIN_FINISHED: usize = 256;

// ═══════════════════════════════════════════════════════════════════════
// Status and events
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn name(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Progress { job_id: String, progress: u8 },
    Completed { job_id: String, fingerprint: String },
    Failed { job_id: String, error: String },
    Cancelled { job_id: String },
}

/// Pub/sub channel name for a job.
pub fn job_channel(job_id: &str) -> String {
    format!("job:{job_id}")
}

/// Fan-out of events to any number of subscribers per channel.
/// Subscribers whose receiver was dropped are pruned on publish.
#[derive(Default)]
pub struct PubSub {
    subscribers: Mutex<HashMap<String, Vec<Sender<JobEvent>>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Sender<JobEvent>>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, channel: &str) -> Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().entry(channel.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber; returns how many got it.
    pub fn publish(&self, channel: &str, event: JobEvent) -> usize {
        let mut subscribers = self.lock();
        let Some(senders) = subscribers.get_mut(channel) else {
            return 0;
        };
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        let delivered = senders.len();
        if delivered == 0 {
            subscribers.remove(channel);
        }
        delivered
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Queue abstraction
// ═══════════════════════════════════════════════════════════════════════

/// What a submitter gets back: the job id, its status at submission, and
/// a receiver for its events.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    pub status: JobStatus,
    pub events: Receiver<JobEvent>,
}

/// A queue that accepts render requests for later execution.
pub trait JobQueue: Send + Sync {
    fn submit(
        &self,
        job_id: Option<String>,
        payload: RawRequest,
        priority: u8,
    ) -> Result<JobHandle, HandlerError>;
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobBoardConfig {
    pub workers: usize,
    /// How many completed, failed or cancelled jobs stay queryable.
    pub retain_finished: usize,
}

impl Default for JobBoardConfig {
    fn default() -> Self {
        Self { workers: 2, retain_finished: DEFAULT_RETAIN_FINISHED }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// JobBoard
// ═══════════════════════════════════════════════════════════════════════

struct JobRecord {
    status: JobStatus,
    progress: u8,
    result: Option<Arc<RenderResponseEnvelope>>,
    error: Option<String>,
    cancel: CancelToken,
}

impl JobRecord {
    fn new(status: JobStatus) -> Self {
        Self { status, progress: 0, result: None, error: None, cancel: CancelToken::new() }
    }
}

/// Job records plus the order in which jobs reached a terminal state.
struct JobTable {
    records: HashMap<String, JobRecord>,
    finished: VecDeque<String>,
    retain_finished: usize,
}

impl JobTable {
    fn new(retain_finished: usize) -> Self {
        Self { records: HashMap::new(), finished: VecDeque::new(), retain_finished }
    }

    /// Note that a job finished and forget the oldest finished jobs
    /// beyond the retention limit.
    fn retire(&mut self, job_id: &str) {
        self.finished.push_back(job_id.to_string());
        while self.finished.len() > self.retain_finished {
            if let Some(old) = self.finished.pop_front() {
                self.records.remove(&old);
                debug!(job_id = %old, "finished job forgotten");
            }
        }
    }
}

struct QueuedJob {
    priority: u8,
    seq: u64,
    job_id: String,
    prepared: PreparedRequest,
}

// Higher priority first; equal priorities run in submission order.
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedJob {}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    handler: Arc<RenderRequestHandler>,
    queue: Mutex<QueueState>,
    available: Condvar,
    jobs: RwLock<JobTable>,
    pubsub: PubSub,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs(&self) -> RwLockReadGuard<'_, JobTable> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs_mut(&self) -> RwLockWriteGuard<'_, JobTable> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to a job's record, then publish `event` if any. A record
    /// that `f` moves into a terminal state is retired.
    fn update<F>(&self, job_id: &str, f: F)
    where
        F: FnOnce(&mut JobRecord) -> Option<JobEvent>,
    {
        let event = {
            let mut jobs = self.jobs_mut();
            let Some(record) = jobs.records.get_mut(job_id) else {
                return;
            };
            let was_terminal = record.status.is_terminal();
            let event = f(record);
            if !was_terminal && record.status.is_terminal() {
                jobs.retire(job_id);
            }
            event
        };
        if let Some(event) = event {
            self.pubsub.publish(&job_channel(job_id), event);
        }
    }
}

pub struct JobBoard {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobBoard {
    pub fn new(handler: Arc<RenderRequestHandler>, config: JobBoardConfig) -> Self {
        let shared = Arc::new(Shared {
            handler,
            queue: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            jobs: RwLock::new(JobTable::new(config.retain_finished)),
            pubsub: PubSub::new(),
        });
        let workers = (0..config.workers.max(1))
            .map(|n| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("render-worker-{n}"))
                    .spawn(move || worker_loop(shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "failed to spawn render worker");
                    None
                }
            })
            .collect();
        Self { shared, workers: Mutex::new(workers) }
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.shared.pubsub
    }

    pub fn handler(&self) -> &Arc<RenderRequestHandler> {
        &self.shared.handler
    }

    /// Validate and submit. A request whose render is already cached
    /// completes immediately without entering the queue.
    pub fn submit_render(
        &self,
        job_id: Option<String>,
        raw: &RawRequest,
        priority: u8,
    ) -> Result<JobHandle, HandlerError> {
        match self.shared.handler.check_cache(raw)? {
            CacheCheck::Hit(envelope) => Ok(self.complete_from_cache(job_id, envelope)?),
            CacheCheck::Miss(prepared) => Ok(self.submit_prepared(job_id, prepared, priority)?),
        }
    }

    /// Queue an already validated request.
    pub fn submit_prepared(
        &self,
        job_id: Option<String>,
        prepared: PreparedRequest,
        priority: u8,
    ) -> Result<JobHandle, JobError> {
        let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut queue = self.shared.queue();
        if queue.shutdown {
            return Err(JobError::ShutDown);
        }
        let events = self.register(&job_id, JobRecord::new(JobStatus::Queued))?;

        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(QueuedJob { priority, seq, job_id: job_id.clone(), prepared });
        drop(queue);
        self.shared.available.notify_one();

        info!(%job_id, priority, "job queued");
        Ok(JobHandle { job_id, status: JobStatus::Queued, events })
    }

    fn complete_from_cache(
        &self,
        job_id: Option<String>,
        envelope: Arc<RenderResponseEnvelope>,
    ) -> Result<JobHandle, JobError> {
        let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let fingerprint = envelope.fingerprint.clone();
        let record = JobRecord {
            status: JobStatus::Completed,
            progress: 100,
            result: Some(envelope),
            ..JobRecord::new(JobStatus::Completed)
        };
        let events = self.register(&job_id, record)?;
        self.shared.jobs_mut().retire(&job_id);
        debug!(%job_id, %fingerprint, "job served from cache");
        self.shared
            .pubsub
            .publish(&job_channel(&job_id), JobEvent::Completed { job_id: job_id.clone(), fingerprint });
        Ok(JobHandle { job_id, status: JobStatus::Completed, events })
    }

    /// Insert a record and subscribe to its channel before anything can
    /// publish on it.
    fn register(&self, job_id: &str, record: JobRecord) -> Result<Receiver<JobEvent>, JobError> {
        let mut jobs = self.shared.jobs_mut();
        if jobs.records.contains_key(job_id) {
            return Err(JobError::DuplicateJob(job_id.to_string()));
        }
        let events = self.shared.pubsub.subscribe(&job_channel(job_id));
        jobs.records.insert(job_id.to_string(), record);
        Ok(events)
    }

    pub fn status(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        let jobs = self.shared.jobs();
        let record = jobs.records.get(job_id).ok_or_else(|| JobError::UnknownJob(job_id.to_string()))?;
        Ok(JobSnapshot {
            job_id: job_id.to_string(),
            status: record.status,
            progress: record.progress,
            error: record.error.clone(),
        })
    }

    /// The finished envelope of a completed job.
    pub fn result(&self, job_id: &str) -> Result<Arc<RenderResponseEnvelope>, JobError> {
        let jobs = self.shared.jobs();
        let record = jobs.records.get(job_id).ok_or_else(|| JobError::UnknownJob(job_id.to_string()))?;
        match (&record.status, &record.result) {
            (JobStatus::Completed, Some(envelope)) => Ok(Arc::clone(envelope)),
            (status, _) => Err(JobError::NotCompleted {
                job_id: job_id.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Cancel a job. Queued jobs are cancelled at once; running jobs stop
    /// at the next page or format boundary. Returns the status afterwards.
    pub fn cancel(&self, job_id: &str) -> Result<JobStatus, JobError> {
        let mut status = None;
        self.shared.update(job_id, |record| {
            let event = match record.status {
                JobStatus::Queued => {
                    record.status = JobStatus::Cancelled;
                    Some(JobEvent::Cancelled { job_id: job_id.to_string() })
                }
                JobStatus::Running => {
                    record.cancel.cancel();
                    None
                }
                _ => None,
            };
            status = Some(record.status);
            event
        });
        status.ok_or_else(|| JobError::UnknownJob(job_id.to_string()))
    }

    /// Stop accepting work, let workers drain the queue, and join them.
    pub fn shutdown(&self) {
        self.shared.queue().shutdown = true;
        self.shared.available.notify_all();
        let workers: Vec<_> = self.workers.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("render worker panicked");
            }
        }
    }
}

impl JobQueue for JobBoard {
    fn submit(
        &self,
        job_id: Option<String>,
        payload: RawRequest,
        priority: u8,
    ) -> Result<JobHandle, HandlerError> {
        self.submit_render(job_id, &payload, priority)
    }
}

impl Drop for JobBoard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue();
            loop {
                if let Some(job) = queue.heap.pop() {
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared.available.wait(queue).unwrap_or_else(|e| e.into_inner());
            }
        };
        run_job(&shared, job);
    }
}

fn run_job(shared: &Shared, job: QueuedJob) {
    let QueuedJob { job_id, prepared, .. } = job;

    let mut cancel = None;
    shared.update(&job_id, |record| {
        if record.status != JobStatus::Queued {
            return None;
        }
        record.status = JobStatus::Running;
        record.progress = 10;
        cancel = Some(record.cancel.clone());
        Some(JobEvent::Progress { job_id: job_id.clone(), progress: 10 })
    });
    // Cancelled while waiting in the queue.
    let Some(cancel) = cancel else {
        debug!(%job_id, "skipping cancelled job");
        return;
    };

    debug!(%job_id, "job running");
    let result = shared.handler.render_prepared(&prepared, &cancel);

    shared.update(&job_id, |record| match result {
        Ok(envelope) => {
            info!(%job_id, "job completed");
            record.status = JobStatus::Completed;
            record.progress = 100;
            let fingerprint = envelope.fingerprint.clone();
            record.result = Some(envelope);
            Some(JobEvent::Completed { job_id: job_id.clone(), fingerprint })
        }
        Err(HandlerError::Render(RenderError::Cancelled)) => {
            info!(%job_id, "job cancelled");
            record.status = JobStatus::Cancelled;
            Some(JobEvent::Cancelled { job_id: job_id.clone() })
        }
        Err(e) => {
            warn!(%job_id, error = %e, "job failed");
            record.status = JobStatus::Failed;
            record.error = Some(e.to_string());
            Some(JobEvent::Failed { job_id: job_id.clone(), error: e.to_string() })
        }
    });
}
