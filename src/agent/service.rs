//! Agent service wiring.
//!
//! Builds the whole pool family against one shared state bundle and the
//! injected collaborator contracts, then brings up workers, reporters, and
//! the signal guard. Kind-to-handler wiring lives here and nowhere else.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;

use super::ledger::{ReportVersion, TaskLedger};
use super::master::{MasterClient, MasterState};
use super::metrics::AgentMetrics;
use super::pool::{AgentShared, PoolMode, SubmitOutcome, TaskWorkerPool};
use super::protocol::AgentStatsResponse;
use super::reporter;
use super::types::{AgentTaskRequest, BackendIdentity, TaskKind};
use super::workers;
use crate::config::AgentConfig;
use crate::engine::{SnapshotLoader, SnapshotManager, StorageEngine, TabletManager};

/// The external systems the agent drives, injected at construction.
#[derive(Clone)]
pub struct AgentCollaborators {
    pub engine: Arc<dyn StorageEngine>,
    pub tablets: Arc<dyn TabletManager>,
    pub snapshots: Arc<dyn SnapshotManager>,
    pub loader: Arc<dyn SnapshotLoader>,
}

pub struct AgentService {
    shared: Arc<AgentShared>,
    pools: HashMap<TaskKind, Arc<TaskWorkerPool>>,
    collaborators: AgentCollaborators,
}

impl AgentService {
    pub fn new(
        config: AgentConfig,
        backend: BackendIdentity,
        master: Arc<dyn MasterClient>,
        master_state: Arc<MasterState>,
        collaborators: AgentCollaborators,
    ) -> Arc<Self> {
        let shared = Arc::new(AgentShared {
            config,
            backend,
            ledger: TaskLedger::new(),
            report_version: ReportVersion::new(),
            metrics: AgentMetrics::default(),
            master,
            master_state,
        });

        let cfg = shared.config.clone();
        let engine = collaborators.engine.clone();
        let tablets = collaborators.tablets.clone();
        let snapshots = collaborators.snapshots.clone();
        let loader = collaborators.loader.clone();
        let push_workers =
            cfg.push_worker_count_normal_priority + cfg.push_worker_count_high_priority;

        let mut pools = HashMap::new();
        let mut add = |kind: TaskKind, count: u32, mode: PoolMode, tracks: bool, handler| {
            pools.insert(
                kind,
                TaskWorkerPool::new(kind, count, mode, tracks, handler, shared.clone()),
            );
        };

        add(
            TaskKind::CreateTablet,
            cfg.create_tablet_worker_count,
            PoolMode::Fifo,
            true,
            workers::create_tablet(engine.clone()),
        );
        add(
            TaskKind::DropTablet,
            cfg.drop_tablet_worker_count,
            PoolMode::Fifo,
            false,
            workers::drop_tablet(engine.clone()),
        );
        add(
            TaskKind::Push,
            push_workers,
            PoolMode::PushScheduling {
                high_priority_workers: cfg.push_worker_count_high_priority,
            },
            true,
            workers::push(engine.clone()),
        );
        add(
            TaskKind::RealtimePush,
            push_workers,
            PoolMode::PushScheduling {
                high_priority_workers: cfg.push_worker_count_high_priority,
            },
            true,
            workers::push(engine.clone()),
        );
        add(
            TaskKind::Delete,
            cfg.delete_worker_count,
            PoolMode::PushScheduling {
                high_priority_workers: 0,
            },
            true,
            workers::push(engine.clone()),
        );
        add(
            TaskKind::AlterTablet,
            cfg.alter_tablet_worker_count,
            PoolMode::Fifo,
            true,
            workers::alter_tablet(engine.clone(), tablets.clone()),
        );
        add(
            TaskKind::PublishVersion,
            cfg.publish_version_worker_count,
            PoolMode::Fifo,
            false,
            workers::publish_version(engine.clone(), cfg.sleep_one()),
        );
        add(
            TaskKind::ClearAlterTask,
            cfg.clear_alter_task_worker_count,
            PoolMode::Fifo,
            false,
            workers::clear_alter_task(engine.clone()),
        );
        add(
            TaskKind::ClearTransactionTask,
            cfg.clear_transaction_task_worker_count,
            PoolMode::Fifo,
            false,
            workers::clear_transaction_task(engine.clone()),
        );
        add(
            TaskKind::Clone,
            cfg.clone_worker_count,
            PoolMode::Fifo,
            false,
            workers::clone_tablet(engine.clone(), shared.clone()),
        );
        add(
            TaskKind::StorageMediumMigrate,
            cfg.storage_medium_migrate_count,
            PoolMode::Fifo,
            false,
            workers::storage_medium_migrate(engine.clone()),
        );
        add(
            TaskKind::CheckConsistency,
            cfg.check_consistency_worker_count,
            PoolMode::Fifo,
            false,
            workers::check_consistency(engine.clone()),
        );
        add(
            TaskKind::Upload,
            cfg.upload_worker_count,
            PoolMode::Fifo,
            false,
            workers::upload(loader.clone()),
        );
        add(
            TaskKind::Download,
            cfg.download_worker_count,
            PoolMode::Fifo,
            false,
            workers::download(loader.clone()),
        );
        add(
            TaskKind::MakeSnapshot,
            cfg.make_snapshot_worker_count,
            PoolMode::Fifo,
            false,
            workers::make_snapshot(snapshots.clone()),
        );
        add(
            TaskKind::ReleaseSnapshot,
            cfg.release_snapshot_worker_count,
            PoolMode::Fifo,
            false,
            workers::release_snapshot(snapshots.clone()),
        );
        // Moves and recoveries are strictly serialized.
        add(
            TaskKind::MoveDir,
            1,
            PoolMode::Fifo,
            false,
            workers::move_dir(tablets.clone(), loader.clone()),
        );
        add(
            TaskKind::RecoverTablet,
            1,
            PoolMode::Fifo,
            false,
            workers::recover_tablet(engine.clone()),
        );

        Arc::new(Self {
            shared,
            pools,
            collaborators,
        })
    }

    /// Bring up every worker and the three reporter loops. Idempotent
    /// callers beware: this spawns on every call and is meant to run once.
    pub fn start(&self) {
        install_signal_guard();

        for pool in self.pools.values() {
            pool.start();
        }

        tokio::spawn(reporter::run_task_reporter(self.shared.clone()));
        tokio::spawn(reporter::run_disk_reporter(
            self.shared.clone(),
            self.collaborators.engine.clone(),
        ));
        tokio::spawn(reporter::run_tablet_reporter(
            self.shared.clone(),
            self.collaborators.engine.clone(),
        ));

        tracing::info!(pools = self.pools.len(), "agent service started");
    }

    /// Route a coordinator submission to its pool. Non-blocking: the task is
    /// acknowledged as soon as it is queued (or recognized as a duplicate).
    pub async fn submit(&self, task: AgentTaskRequest) -> Result<SubmitOutcome> {
        let Some(pool) = self.pools.get(&task.kind) else {
            bail!("no worker pool for task kind {:?}", task.kind);
        };
        Ok(pool.submit(task).await)
    }

    pub fn shared(&self) -> &Arc<AgentShared> {
        &self.shared
    }

    pub fn master_state(&self) -> &Arc<MasterState> {
        &self.shared.master_state
    }

    pub fn pool(&self, kind: TaskKind) -> Option<&Arc<TaskWorkerPool>> {
        self.pools.get(&kind)
    }

    pub fn stats(&self) -> AgentStatsResponse {
        AgentStatsResponse {
            report_version: self.shared.report_version.current(),
            pending: self.shared.ledger.pending_counts(),
            metrics: self.shared.metrics.snapshot(),
        }
    }
}

static SIGNAL_GUARD: Once = Once::new();

/// Confine SIGHUP/SIGCHLD/SIGPIPE to a dedicated drain task so delivery
/// never lands on a worker. Installed once, before the first worker spawns.
fn install_signal_guard() {
    SIGNAL_GUARD.call_once(|| {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let guarded = [
                (SignalKind::hangup(), "SIGHUP"),
                (SignalKind::child(), "SIGCHLD"),
                (SignalKind::pipe(), "SIGPIPE"),
            ];
            for (kind, name) in guarded {
                match signal(kind) {
                    Ok(mut stream) => {
                        tokio::spawn(async move {
                            loop {
                                stream.recv().await;
                                tracing::debug!(signal = name, "signal drained");
                            }
                        });
                    }
                    Err(error) => {
                        tracing::warn!(signal = name, %error, "failed to install signal guard");
                    }
                }
            }
        }
    });
}
