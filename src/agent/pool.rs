//! Worker pool implementation.
//!
//! One pool per task kind: a FIFO queue guarded by a mutex, a wakeup signal
//! for idle workers, and a fixed number of detached worker tasks spawned at
//! startup. Submission deduplicates against the shared ledger before
//! enqueueing; completion reports to the coordinator and releases the
//! ledger slot.
//!
//! Push-style pools replace FIFO pickup with the band/fair-share selection
//! from [`scheduler`](super::scheduler): the first `high_priority_workers`
//! workers only serve high-priority requests, the rest balance tenants.
//!
//! Locks are never held across a handler invocation, a sleep, or an RPC.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use super::ledger::{ReportVersion, TaskLedger};
use super::master::{self, MasterClient, MasterState};
use super::metrics::AgentMetrics;
use super::protocol::{FinishExtras, FinishTaskRequest, TaskStatus};
use super::scheduler::{select_task_index, Band};
use super::types::{AgentTaskRequest, BackendIdentity, TaskKind};
use crate::config::AgentConfig;

/// Dependencies shared by every pool and reporter: the ledger, the report
/// version counter, metrics, and the coordinator client. Bundled so a pool
/// takes one injected value instead of seven.
pub struct AgentShared {
    pub config: AgentConfig,
    pub backend: BackendIdentity,
    pub ledger: TaskLedger,
    pub report_version: ReportVersion,
    pub metrics: AgentMetrics,
    pub master: Arc<dyn MasterClient>,
    pub master_state: Arc<MasterState>,
}

/// What a domain handler hands back to its pool.
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub extras: FinishExtras,
    /// `false` suppresses the finish RPC entirely (idempotent push replay);
    /// the ledger slot is still released.
    pub report: bool,
}

impl TaskOutcome {
    pub fn ok() -> Self {
        Self {
            status: TaskStatus::ok(),
            extras: FinishExtras::default(),
            report: true,
        }
    }

    pub fn ok_with(extras: FinishExtras) -> Self {
        Self {
            status: TaskStatus::ok(),
            extras,
            report: true,
        }
    }

    pub fn error(
        status_code: super::protocol::StatusCode,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            status: TaskStatus::error(status_code, msg),
            extras: FinishExtras::default(),
            report: true,
        }
    }

    pub fn error_with(
        status_code: super::protocol::StatusCode,
        msg: impl Into<String>,
        extras: FinishExtras,
    ) -> Self {
        Self {
            status: TaskStatus::error(status_code, msg),
            extras,
            report: true,
        }
    }

    pub fn silent() -> Self {
        Self {
            status: TaskStatus::ok(),
            extras: FinishExtras::default(),
            report: false,
        }
    }
}

/// A pool's domain handler: one boxed async function per task kind.
pub type TaskHandlerFn =
    Arc<dyn Fn(AgentTaskRequest) -> Pin<Box<dyn Future<Output = TaskOutcome> + Send>> + Send + Sync>;

/// How a pool's workers drain the queue.
pub enum PoolMode {
    Fifo,
    PushScheduling { high_priority_workers: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Duplicate,
}

pub struct TaskWorkerPool {
    kind: TaskKind,
    worker_count: u32,
    mode: PoolMode,
    /// Create, push, and alter advance the report version on success and
    /// stamp the current value into their finish messages.
    tracks_report_version: bool,
    handler: TaskHandlerFn,
    queue: Mutex<VecDeque<AgentTaskRequest>>,
    not_empty: Notify,
    shared: Arc<AgentShared>,
}

impl TaskWorkerPool {
    pub fn new(
        kind: TaskKind,
        worker_count: u32,
        mode: PoolMode,
        tracks_report_version: bool,
        handler: TaskHandlerFn,
        shared: Arc<AgentShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            worker_count,
            mode,
            tracks_report_version,
            handler,
            queue: Mutex::new(VecDeque::new()),
            not_empty: Notify::new(),
            shared,
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Accept a task: record it in the ledger (dedup), append to the queue,
    /// and wake one idle worker. A duplicate signature is acknowledged but
    /// neither enqueued nor surfaced as an error.
    pub async fn submit(&self, task: AgentTaskRequest) -> SubmitOutcome {
        if !self
            .shared
            .ledger
            .try_record(task.kind, task.signature, task.effective_user())
        {
            self.shared
                .metrics
                .tasks_duplicated
                .fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Duplicate;
        }
        self.shared
            .metrics
            .tasks_submitted
            .fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.queue.lock().await;
            queue.push_back(task);
        }
        self.not_empty.notify_one();
        SubmitOutcome::Accepted
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Spawn the pool's workers as detached tasks. Workers run until the
    /// process exits; there is no join on shutdown.
    pub fn start(self: &Arc<Self>) {
        match self.mode {
            PoolMode::Fifo => {
                for _ in 0..self.worker_count {
                    let pool = self.clone();
                    tokio::spawn(async move { pool.run_fifo_worker().await });
                }
            }
            PoolMode::PushScheduling {
                high_priority_workers,
            } => {
                for index in 0..self.worker_count {
                    let band = if index < high_priority_workers {
                        Band::High
                    } else {
                        Band::Normal
                    };
                    let pool = self.clone();
                    tokio::spawn(async move { pool.run_push_worker(band).await });
                }
            }
        }
        tracing::info!(kind = ?self.kind, workers = self.worker_count, "worker pool started");
    }

    async fn run_fifo_worker(self: Arc<Self>) {
        loop {
            let task = loop {
                if let Some(task) = self.queue.lock().await.pop_front() {
                    break task;
                }
                self.not_empty.notified().await;
            };
            tracing::info!(kind = ?self.kind, signature = task.signature, "picked task");
            self.run_task(task).await;
        }
    }

    async fn run_push_worker(self: Arc<Self>, band: Band) {
        loop {
            let task = loop {
                {
                    let mut queue = self.queue.lock().await;
                    if !queue.is_empty() {
                        match select_task_index(&queue, band, &self.shared.ledger, self.worker_count)
                        {
                            Some(index) => {
                                break queue.remove(index).expect("selected index in bounds");
                            }
                            None if band == Band::Normal => {
                                // No tenant qualified; take the oldest.
                                break queue.pop_front().expect("queue checked non-empty");
                            }
                            None => {
                                // No high-priority work; hand the wakeup to a
                                // NORMAL worker and back off a second.
                                drop(queue);
                                self.not_empty.notify_one();
                                tokio::time::sleep(self.shared.config.sleep_one()).await;
                                continue;
                            }
                        }
                    }
                }
                self.not_empty.notified().await;
            };
            self.shared
                .ledger
                .note_running(task.kind, task.effective_user());
            tracing::info!(
                kind = ?self.kind,
                signature = task.signature,
                user = task.effective_user(),
                ?band,
                "picked push task"
            );
            self.run_task(task).await;
        }
    }

    async fn run_task(&self, task: AgentTaskRequest) {
        let kind = task.kind;
        let signature = task.signature;
        let user = task.effective_user().to_string();

        let outcome = (self.handler)(task).await;

        if outcome.report {
            if self.tracks_report_version && outcome.status.is_ok() {
                self.shared.report_version.bump();
            }
            let request = FinishTaskRequest {
                backend: self.shared.backend.clone(),
                task_kind: kind,
                signature,
                task_status: outcome.status,
                report_version: self
                    .tracks_report_version
                    .then(|| self.shared.report_version.current()),
                extras: outcome.extras,
            };
            master::finish_task_with_retry(
                self.shared.master.as_ref(),
                &self.shared.metrics,
                &request,
                self.shared.config.sleep_one(),
            )
            .await;
        } else {
            tracing::info!(?kind, signature, "task absorbed locally, no coordinator report");
        }

        self.shared.ledger.remove(kind, signature, &user);
    }
}
