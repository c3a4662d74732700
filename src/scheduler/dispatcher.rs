use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::EngineConfig;
use crate::error::{DocflowError, Result};
use crate::ports::{FileCatalog, FileRecord, JobRepository};
use crate::scheduler::job::{
    FileId, Job, JobId, JobMetadata, JobSnapshot, JobUpdate, Priority, StageType,
};
use crate::scheduler::policy::StagePolicy;
use crate::scheduler::queue::PendingQueue;
use crate::worker::{HandlerRegistry, JobExecutor};

/// Messages consumed by the dispatcher loop. The loop is the only writer of
/// queue membership and of the active set.
#[derive(Debug)]
enum DispatchMessage {
    Enqueue {
        job_id: JobId,
        priority: Priority,
    },
    Cancel {
        job_id: JobId,
        response_tx: oneshot::Sender<Result<CancelOutcome>>,
    },
    /// Sent by a job task after its terminal status is persisted. Carries the
    /// concurrency slot back so it is released only once the job left the active set.
    Finished {
        job_id: JobId,
        permit: OwnedSemaphorePermit,
    },
}

/// What `cancel_job` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Removed from the pending queue and marked Cancelled; never ran.
    Dequeued,
    /// Running; the cancellation token was raised for the handler to observe.
    Signalled,
    /// Already terminal; nothing changed.
    AlreadyFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub active_jobs: usize,
    pub max_concurrency: usize,
    pub is_dispatcher_running: bool,
}

/// Counters published by the dispatcher after every loop iteration.
#[derive(Debug, Default)]
struct DispatchStats {
    queue_length: AtomicUsize,
    active_jobs: AtomicUsize,
    running: AtomicBool,
}

/// Collaborators and policy the scheduler is built from.
pub struct EngineDeps {
    pub repository: Arc<dyn JobRepository>,
    pub catalog: Arc<dyn FileCatalog>,
    pub registry: HandlerRegistry,
    pub policy: StagePolicy,
}

/// Public API of the engine. Cheap to clone; every clone talks to the same
/// dispatcher.
#[derive(Clone)]
pub struct Scheduler {
    repository: Arc<dyn JobRepository>,
    catalog: Arc<dyn FileCatalog>,
    registry: Arc<HandlerRegistry>,
    policy: Arc<StagePolicy>,
    message_tx: mpsc::UnboundedSender<DispatchMessage>,
    stats: Arc<DispatchStats>,
    max_concurrency: usize,
}

/// Single owner of the pending queue and the active-job set.
pub struct Dispatcher {
    queue: PendingQueue,
    active: HashMap<JobId, CancellationToken>,
    slots: Arc<Semaphore>,
    executor: JobExecutor,
    repository: Arc<dyn JobRepository>,
    message_rx: mpsc::UnboundedReceiver<DispatchMessage>,
    message_tx: mpsc::UnboundedSender<DispatchMessage>,
    stats: Arc<DispatchStats>,
    tick_interval: Duration,
    max_concurrency: usize,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Build the scheduler and its dispatcher. Nothing is admitted until the
    /// dispatcher is driven with [`Dispatcher::run`]; jobs added before that
    /// wait in the queue.
    pub fn new(
        config: &EngineConfig,
        deps: EngineDeps,
        shutdown: CancellationToken,
    ) -> (Self, Dispatcher) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let max_concurrency = config.max_concurrency.max(1);
        let stats = Arc::new(DispatchStats::default());
        let registry = Arc::new(deps.registry);

        let executor = JobExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&deps.repository),
            Arc::clone(&deps.catalog),
        );

        let dispatcher = Dispatcher {
            queue: PendingQueue::new(),
            active: HashMap::new(),
            slots: Arc::new(Semaphore::new(max_concurrency)),
            executor,
            repository: Arc::clone(&deps.repository),
            message_rx,
            message_tx: message_tx.clone(),
            stats: Arc::clone(&stats),
            tick_interval: config.dispatch_tick_interval,
            max_concurrency,
            shutdown,
        };

        let scheduler = Self {
            repository: deps.repository,
            catalog: deps.catalog,
            registry,
            policy: Arc::new(deps.policy),
            message_tx,
            stats,
            max_concurrency,
        };

        (scheduler, dispatcher)
    }

    /// Create a Pending job and enqueue it.
    ///
    /// # Errors
    ///
    /// `Validation` if the file is unknown, the stage is disabled or no handler
    /// serves it, `Infrastructure` if the record cannot be persisted,
    /// `DispatcherStopped` after shutdown.
    pub async fn add_job(
        &self,
        file_id: FileId,
        stage: StageType,
        priority: Priority,
        metadata: JobMetadata,
        created_by: &str,
    ) -> Result<JobId> {
        self.ensure_accepting()?;
        let file = self.resolve_file(file_id).await?;
        self.ensure_supported(&[stage])?;
        self.create_and_enqueue(&file, stage, priority, metadata, created_by)
            .await
    }

    /// Create one job per stage for a file. Without explicit stages the
    /// required-jobs policy decides from the file's content type.
    ///
    /// All stages are validated before any job is created.
    pub async fn process_file(
        &self,
        file_id: FileId,
        created_by: &str,
        stages: Option<Vec<StageType>>,
    ) -> Result<Vec<JobId>> {
        self.ensure_accepting()?;
        let file = self.resolve_file(file_id).await?;
        let stages = match stages {
            Some(stages) => stages,
            None => self.policy.required_stages(&file.content_type),
        };
        self.ensure_supported(&stages)?;

        tracing::info!(
            file_id = %file_id,
            content_type = %file.content_type,
            stages = ?stages,
            "Processing file"
        );

        let mut job_ids = Vec::with_capacity(stages.len());
        for stage in stages {
            let job_id = self
                .create_and_enqueue(
                    &file,
                    stage,
                    stage.priority(),
                    JobMetadata::new(),
                    created_by,
                )
                .await?;
            job_ids.push(job_id);
        }
        Ok(job_ids)
    }

    pub async fn get_job_status(&self, job_id: JobId) -> Result<Option<JobSnapshot>> {
        Ok(self.repository.get_by_id(job_id).await?)
    }

    /// Jobs for a file, newest first.
    pub async fn get_file_jobs(&self, file_id: FileId) -> Result<Vec<JobSnapshot>> {
        Ok(self.repository.list_by_file(file_id).await?)
    }

    /// Cancel a job. Pending jobs are cancelled immediately; Processing jobs
    /// are signalled and finish as Cancelled once their handler observes it.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<CancelOutcome> {
        let (response_tx, response_rx) = oneshot::channel();
        self.message_tx
            .send(DispatchMessage::Cancel {
                job_id,
                response_tx,
            })
            .map_err(|_| DocflowError::DispatcherStopped)?;
        match response_rx.await {
            Ok(result) => result,
            // The reply is dropped unanswered only when the loop exits with the
            // request still queued; a live dispatcher always answers.
            Err(_) if !self.stats.running.load(Ordering::SeqCst) => {
                Err(DocflowError::DispatcherStopped)
            }
            Err(_) => Err(DocflowError::Internal(format!(
                "cancel request for job {} was dropped",
                job_id
            ))),
        }
    }

    /// Counters as of the dispatcher's last loop iteration. A job added a
    /// moment ago shows up once the dispatcher has taken its enqueue message.
    pub fn get_queue_status(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.stats.queue_length.load(Ordering::SeqCst),
            active_jobs: self.stats.active_jobs.load(Ordering::SeqCst),
            max_concurrency: self.max_concurrency,
            is_dispatcher_running: self.stats.running.load(Ordering::SeqCst),
        }
    }

    pub fn required_stages(&self, content_type: &str) -> Vec<StageType> {
        self.policy.required_stages(content_type)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.message_tx.is_closed() {
            return Err(DocflowError::DispatcherStopped);
        }
        Ok(())
    }

    async fn resolve_file(&self, file_id: FileId) -> Result<FileRecord> {
        self.catalog
            .get_file(file_id)
            .await?
            .ok_or_else(|| DocflowError::Validation(format!("unknown file id: {}", file_id)))
    }

    fn ensure_supported(&self, stages: &[StageType]) -> Result<()> {
        for stage in stages {
            if !self.registry.supports(*stage) {
                return Err(DocflowError::Validation(format!(
                    "unsupported stage type: {}",
                    stage
                )));
            }
            if !self.policy.flags().is_enabled(*stage) {
                return Err(DocflowError::Validation(format!(
                    "stage type is disabled: {}",
                    stage
                )));
            }
        }
        Ok(())
    }

    async fn create_and_enqueue(
        &self,
        file: &FileRecord,
        stage: StageType,
        priority: Priority,
        metadata: JobMetadata,
        created_by: &str,
    ) -> Result<JobId> {
        let job = Job::new(file.id, stage, priority, metadata, created_by);
        let job_id = job.id;
        self.repository.create(&job).await?;

        if self
            .message_tx
            .send(DispatchMessage::Enqueue { job_id, priority })
            .is_err()
        {
            // The record exists but will never run; do not leave it Pending.
            if let Err(e) = self
                .repository
                .update(job_id, JobUpdate::Cancelled { at: Utc::now() })
                .await
            {
                tracing::error!(job_id = %job_id, error = %e, "Failed to cancel job after dispatcher stopped");
            }
            return Err(DocflowError::DispatcherStopped);
        }

        tracing::debug!(
            job_id = %job_id,
            file_id = %file.id,
            stage = %stage,
            priority = %priority,
            "Job created"
        );
        Ok(job_id)
    }
}

impl Dispatcher {
    /// Dispatch loop. Admission runs after every message (enqueue, cancel,
    /// completion) and on a fixed tick, until the shutdown token fires.
    pub async fn run(mut self) {
        self.stats.running.store(true, Ordering::SeqCst);
        tracing::info!(max_concurrency = self.max_concurrency, "Dispatcher started");

        let mut tick = tokio::time::interval(self.tick_interval.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                message = self.message_rx.recv() => {
                    match message {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.publish();
                        }
                        None => break,
                    }
                }

                _ = tick.tick() => {}
            }

            self.admit().await;
            self.publish();
        }

        // Running handlers hold child tokens of `shutdown`, so they are
        // already signalled.
        self.stats.running.store(false, Ordering::SeqCst);
        self.publish();
        tracing::info!(
            pending = self.queue.len(),
            active = self.active.len(),
            "Dispatcher stopped"
        );
    }

    async fn handle_message(&mut self, message: DispatchMessage) {
        match message {
            DispatchMessage::Enqueue { job_id, priority } => {
                self.queue.push(job_id, priority);
                tracing::debug!(job_id = %job_id, priority = %priority, queue_length = self.queue.len(), "Job enqueued");
            }
            DispatchMessage::Cancel {
                job_id,
                response_tx,
            } => {
                let result = self.cancel(job_id).await;
                // Counters are current by the time the caller sees the reply.
                self.publish();
                let _ = response_tx.send(result);
            }
            DispatchMessage::Finished { job_id, permit } => {
                self.active.remove(&job_id);
                drop(permit);
                tracing::debug!(job_id = %job_id, active = self.active.len(), "Job slot released");
            }
        }
    }

    async fn cancel(&mut self, job_id: JobId) -> Result<CancelOutcome> {
        if self.queue.remove(&job_id) {
            self.repository
                .update(job_id, JobUpdate::Cancelled { at: Utc::now() })
                .await?;
            tracing::info!(job_id = %job_id, "Pending job cancelled");
            return Ok(CancelOutcome::Dequeued);
        }

        if let Some(token) = self.active.get(&job_id) {
            token.cancel();
            tracing::info!(job_id = %job_id, "Cancellation requested for running job");
            return Ok(CancelOutcome::Signalled);
        }

        match self.repository.get_by_id(job_id).await? {
            None => Err(DocflowError::JobNotFound(job_id)),
            Some(job) if job.is_terminal() => Ok(CancelOutcome::AlreadyFinished),
            Some(_) => {
                // Pending in storage but not queued here: its enqueue is still
                // in flight or its start failed. It must not run now.
                self.repository
                    .update(job_id, JobUpdate::Cancelled { at: Utc::now() })
                    .await?;
                Ok(CancelOutcome::Dequeued)
            }
        }
    }

    /// Admit pending jobs while a concurrency slot is free.
    async fn admit(&mut self) {
        while !self.queue.is_empty() {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };
            let Some(job_id) = self.queue.pop() else {
                break;
            };
            self.start(job_id, permit).await;
        }
    }

    async fn start(&mut self, job_id: JobId, permit: OwnedSemaphorePermit) {
        let job = match self
            .repository
            .update(job_id, JobUpdate::Started { at: Utc::now() })
            .await
        {
            Ok(job) => job,
            Err(e) => {
                // Dropping the permit frees the slot; the job is not re-enqueued.
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job processing, dropping it");
                return;
            }
        };

        let token = self.shutdown.child_token();
        self.active.insert(job_id, token.clone());

        let span = tracing::info_span!(
            "job",
            job_id = %job_id,
            file_id = %job.file_id,
            stage = %job.stage,
        );
        let executor = self.executor.clone();
        let message_tx = self.message_tx.clone();

        tokio::spawn(
            async move {
                executor.execute(job, token).await;
                let _ = message_tx.send(DispatchMessage::Finished { job_id, permit });
            }
            .instrument(span),
        );

        tracing::debug!(job_id = %job_id, active = self.active.len(), "Job dispatched");
    }

    fn publish(&self) {
        self.stats
            .queue_length
            .store(self.queue.len(), Ordering::SeqCst);
        self.stats
            .active_jobs
            .store(self.active.len(), Ordering::SeqCst);
    }
}
