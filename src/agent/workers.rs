//! Domain handlers, one constructor per task kind.
//!
//! Each constructor closes over the engine capabilities it needs and yields
//! the boxed handler its pool runs for every dequeued task. Handlers map
//! engine results onto the wire status model: malformed requests answer
//! AnalysisError, engine failures answer RuntimeError, and a handful of
//! kinds carry extra finish fields.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::pool::{AgentShared, TaskHandlerFn, TaskOutcome};
use super::protocol::{FinishExtras, StatusCode};
use super::types::{AgentTaskRequest, TaskKind, TaskPayload};
use crate::engine::types::{AlterKind, PushType};
use crate::engine::{
    EngineError, SnapshotLoader, SnapshotManager, StorageEngine, TabletManager,
};

pub const PUBLISH_VERSION_MAX_RETRY: u32 = 3;

fn boxed<F, Fut>(f: F) -> TaskHandlerFn
where
    F: Fn(AgentTaskRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome> + Send + 'static,
{
    Arc::new(move |task| Box::pin(f(task)) as Pin<Box<dyn Future<Output = TaskOutcome> + Send>>)
}

fn mismatched_payload(kind: TaskKind) -> TaskOutcome {
    warn!(?kind, "task payload does not match task kind");
    TaskOutcome::error(
        StatusCode::AnalysisError,
        "task payload does not match task kind",
    )
}

pub fn create_tablet(engine: Arc<dyn StorageEngine>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let TaskPayload::CreateTablet(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            match engine.create_tablet(&req).await {
                Ok(()) => TaskOutcome::ok(),
                Err(error) => {
                    warn!(signature = task.signature, %error, "create tablet failed");
                    TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("create tablet failed: {error}"),
                    )
                }
            }
        }
    })
}

/// Dropping a tablet that is already gone counts as success.
pub fn drop_tablet(engine: Arc<dyn StorageEngine>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let TaskPayload::DropTablet(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            match engine.drop_tablet(req.tablet_id, req.schema_hash).await {
                Ok(()) | Err(EngineError::TabletNotFound { .. }) => TaskOutcome::ok(),
                Err(error) => {
                    warn!(signature = task.signature, %error, "drop tablet failed");
                    TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("drop tablet failed: {error}"),
                    )
                }
            }
        }
    })
}

pub fn push(engine: Arc<dyn StorageEngine>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::Push(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            let mut extras = FinishExtras::default();
            if req.push_type == PushType::Delete {
                extras.request_version = Some(req.version);
                extras.request_version_hash = Some(req.version_hash);
            }
            match engine.batch_load(signature, &req).await {
                Ok(tablet_infos) => {
                    info!(signature, "push succeeded");
                    extras.finish_tablet_infos = Some(tablet_infos);
                    TaskOutcome::ok_with(extras)
                }
                Err(EngineError::AlreadyLoaded(_)) => TaskOutcome::silent(),
                Err(error @ EngineError::InvalidRequest(_)) => {
                    warn!(signature, push_type = ?req.push_type, %error, "push request invalid");
                    TaskOutcome::error_with(StatusCode::AnalysisError, error.to_string(), extras)
                }
                Err(error) => {
                    warn!(signature, %error, "push failed");
                    TaskOutcome::error_with(
                        StatusCode::RuntimeError,
                        format!("push failed: {error}"),
                        extras,
                    )
                }
            }
        }
    })
}

/// Dispatches on the alter sub-kind; unknown sub-kinds are answered without
/// touching the engine. A success whose new-tablet lookup fails is still a
/// success.
pub fn alter_tablet(
    engine: Arc<dyn StorageEngine>,
    tablets: Arc<dyn TabletManager>,
) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        let tablets = tablets.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::AlterTablet(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            let process_name = match req.alter_kind {
                AlterKind::SchemaChange => "schema change",
                AlterKind::Rollup => "rollup",
                AlterKind::Unknown => {
                    warn!(signature, "alter request sub-kind invalid");
                    return TaskOutcome::error(
                        StatusCode::AnalysisError,
                        "alter request sub-kind invalid",
                    );
                }
            };
            match engine.alter_tablet(&req).await {
                Ok(()) => {
                    let mut extras = FinishExtras::default();
                    let new = &req.new_tablet_req;
                    match tablets.tablet_info(new.tablet_id, new.schema_hash).await {
                        Ok(tablet_info) => {
                            extras.finish_tablet_infos = Some(vec![tablet_info]);
                        }
                        Err(error) => {
                            warn!(
                                signature,
                                tablet_id = new.tablet_id,
                                schema_hash = new.schema_hash,
                                %error,
                                "{process_name} succeeded but new tablet info lookup failed"
                            );
                        }
                    }
                    info!(signature, "{process_name} finished");
                    TaskOutcome::ok_with(extras)
                }
                Err(error) => {
                    warn!(signature, %error, "{process_name} failed");
                    TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("{process_name} failed: {error}"),
                    )
                }
            }
        }
    })
}

/// Publishing retries internally before surfacing a failure; the error
/// tablet list is rebuilt on every attempt so only the last one survives.
pub fn publish_version(engine: Arc<dyn StorageEngine>, retry_sleep: Duration) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::PublishVersion(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            let mut error_tablet_ids = Vec::new();
            let mut result = Ok(());
            for _ in 0..PUBLISH_VERSION_MAX_RETRY {
                error_tablet_ids.clear();
                result = engine.publish_version(&req, &mut error_tablet_ids).await;
                match &result {
                    Ok(()) => break,
                    Err(error) => {
                        warn!(
                            transaction_id = req.transaction_id,
                            error_tablets = error_tablet_ids.len(),
                            %error,
                            "publish version error, retry"
                        );
                        tokio::time::sleep(retry_sleep).await;
                    }
                }
            }
            match result {
                Ok(()) => {
                    info!(signature, "publish version succeeded");
                    TaskOutcome::ok()
                }
                Err(error) => {
                    warn!(signature, %error, "publish version failed");
                    let extras = FinishExtras {
                        error_tablet_ids: Some(error_tablet_ids),
                        ..FinishExtras::default()
                    };
                    TaskOutcome::error_with(
                        StatusCode::RuntimeError,
                        format!("publish version failed: {error}"),
                        extras,
                    )
                }
            }
        }
    })
}

pub fn clear_alter_task(engine: Arc<dyn StorageEngine>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let TaskPayload::ClearAlterTask(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            match engine.clear_alter_task(&req).await {
                Ok(()) => TaskOutcome::ok(),
                Err(error) => {
                    warn!(signature = task.signature, %error, "clear alter task failed");
                    TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("clear alter task failed: {error}"),
                    )
                }
            }
        }
    })
}

pub fn clear_transaction_task(engine: Arc<dyn StorageEngine>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let TaskPayload::ClearTransactionTask(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            engine
                .clear_transaction_task(req.transaction_id, req.partition_id)
                .await;
            info!(
                signature = task.signature,
                transaction_id = req.transaction_id,
                "cleared transaction task"
            );
            TaskOutcome::ok()
        }
    })
}

pub fn clone_tablet(engine: Arc<dyn StorageEngine>, shared: Arc<AgentShared>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        let shared = shared.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::Clone(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            shared
                .metrics
                .clone_requests_total
                .fetch_add(1, Ordering::Relaxed);
            match engine.clone_tablet(&req).await {
                Ok(tablet_infos) => {
                    info!(signature, "clone succeeded, tablet infos attached");
                    TaskOutcome::ok_with(FinishExtras {
                        finish_tablet_infos: Some(tablet_infos),
                        ..FinishExtras::default()
                    })
                }
                Err(error) => {
                    shared
                        .metrics
                        .clone_requests_failed
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(signature, %error, "clone failed");
                    TaskOutcome::error(StatusCode::RuntimeError, format!("clone failed: {error}"))
                }
            }
        }
    })
}

pub fn storage_medium_migrate(engine: Arc<dyn StorageEngine>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let TaskPayload::StorageMediumMigrate(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            match engine.storage_medium_migrate(&req).await {
                Ok(()) => {
                    info!(signature = task.signature, "storage medium migrate succeeded");
                    TaskOutcome::ok()
                }
                Err(error) => {
                    warn!(signature = task.signature, %error, "storage medium migrate failed");
                    TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("storage medium migrate failed: {error}"),
                    )
                }
            }
        }
    })
}

pub fn check_consistency(engine: Arc<dyn StorageEngine>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::CheckConsistency(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            let mut extras = FinishExtras {
                request_version: Some(req.version),
                request_version_hash: Some(req.version_hash),
                ..FinishExtras::default()
            };
            match engine.check_consistency(&req).await {
                Ok(checksum) => {
                    info!(signature, checksum, "check consistency succeeded");
                    extras.tablet_checksum = Some(checksum as i64);
                    TaskOutcome::ok_with(extras)
                }
                Err(error) => {
                    warn!(signature, %error, "check consistency failed");
                    TaskOutcome::error_with(
                        StatusCode::RuntimeError,
                        format!("check consistency failed: {error}"),
                        extras,
                    )
                }
            }
        }
    })
}

pub fn upload(loader: Arc<dyn SnapshotLoader>) -> TaskHandlerFn {
    boxed(move |task| {
        let loader = loader.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::Upload(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            match loader.upload(&req).await {
                Ok(tablet_files) => {
                    info!(signature, job_id = req.job_id, "finished upload task");
                    TaskOutcome::ok_with(FinishExtras {
                        tablet_files: Some(tablet_files),
                        ..FinishExtras::default()
                    })
                }
                Err(error) => {
                    warn!(signature, job_id = req.job_id, %error, "upload failed");
                    TaskOutcome::error(StatusCode::RuntimeError, format!("upload failed: {error}"))
                }
            }
        }
    })
}

pub fn download(loader: Arc<dyn SnapshotLoader>) -> TaskHandlerFn {
    boxed(move |task| {
        let loader = loader.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::Download(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            match loader.download(&req).await {
                Ok(downloaded_tablet_ids) => {
                    info!(signature, job_id = req.job_id, "finished download task");
                    TaskOutcome::ok_with(FinishExtras {
                        downloaded_tablet_ids: Some(downloaded_tablet_ids),
                        ..FinishExtras::default()
                    })
                }
                Err(error) => {
                    warn!(signature, job_id = req.job_id, %error, "download failed");
                    TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("download failed: {error}"),
                    )
                }
            }
        }
    })
}

pub fn make_snapshot(snapshots: Arc<dyn SnapshotManager>) -> TaskHandlerFn {
    boxed(move |task| {
        let snapshots = snapshots.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::MakeSnapshot(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            let snapshot_path = match snapshots.make_snapshot(&req).await {
                Ok(snapshot_path) => snapshot_path,
                Err(error) => {
                    warn!(signature, tablet_id = req.tablet_id, %error, "make snapshot failed");
                    return TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("make snapshot failed: {error}"),
                    );
                }
            };
            let mut extras = FinishExtras {
                snapshot_path: Some(snapshot_path.clone()),
                ..FinishExtras::default()
            };
            if req.list_files {
                // The produced tree nests tablet/schema-hash under the
                // snapshot root.
                let dir = format!("{}/{}/{}/", snapshot_path, req.tablet_id, req.schema_hash);
                match snapshots.list_snapshot_files(&dir).await {
                    Ok(snapshot_files) => extras.snapshot_files = Some(snapshot_files),
                    Err(error) => {
                        warn!(signature, %error, "make snapshot succeeded but file listing failed");
                        return TaskOutcome::error_with(
                            StatusCode::RuntimeError,
                            format!("make snapshot failed, list files failed: {error}"),
                            extras,
                        );
                    }
                }
            }
            info!(signature, tablet_id = req.tablet_id, snapshot_path = %snapshot_path, "make snapshot succeeded");
            TaskOutcome::ok_with(extras)
        }
    })
}

pub fn release_snapshot(snapshots: Arc<dyn SnapshotManager>) -> TaskHandlerFn {
    boxed(move |task| {
        let snapshots = snapshots.clone();
        async move {
            let TaskPayload::ReleaseSnapshot(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            match snapshots.release_snapshot(&req.snapshot_path).await {
                Ok(()) => {
                    info!(snapshot_path = %req.snapshot_path, "release snapshot succeeded");
                    TaskOutcome::ok()
                }
                Err(error) => {
                    warn!(snapshot_path = %req.snapshot_path, %error, "release snapshot failed");
                    TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("release snapshot failed: {error}"),
                    )
                }
            }
        }
    })
}

/// A move targets the tablet's live directory; a tablet that cannot be
/// resolved makes the request itself invalid.
pub fn move_dir(tablets: Arc<dyn TabletManager>, loader: Arc<dyn SnapshotLoader>) -> TaskHandlerFn {
    boxed(move |task| {
        let tablets = tablets.clone();
        let loader = loader.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::MoveDir(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            let Some(location) = tablets.get_tablet(req.tablet_id, req.schema_hash).await else {
                info!(
                    tablet_id = req.tablet_id,
                    schema_hash = req.schema_hash,
                    "failed to get tablet for move"
                );
                return TaskOutcome::error(StatusCode::AnalysisError, "failed to get tablet");
            };
            // TODO: take overwrite from the request instead of forcing it.
            match loader
                .move_dir(
                    &req.src,
                    &location.dir_path,
                    &location.store_path,
                    req.job_id,
                    true,
                )
                .await
            {
                Ok(()) => {
                    info!(
                        signature,
                        src = %req.src,
                        tablet_id = req.tablet_id,
                        job_id = req.job_id,
                        "finished moving dir"
                    );
                    TaskOutcome::ok()
                }
                Err(error) => {
                    warn!(signature, src = %req.src, job_id = req.job_id, %error, "move dir failed");
                    TaskOutcome::error(StatusCode::RuntimeError, format!("move dir failed: {error}"))
                }
            }
        }
    })
}

pub fn recover_tablet(engine: Arc<dyn StorageEngine>) -> TaskHandlerFn {
    boxed(move |task| {
        let engine = engine.clone();
        async move {
            let signature = task.signature;
            let TaskPayload::RecoverTablet(req) = task.payload else {
                return mismatched_payload(task.kind);
            };
            info!(
                signature,
                tablet_id = req.tablet_id,
                version = req.version,
                "begin to recover tablet"
            );
            match engine.recover_tablet(&req).await {
                Ok(()) => {
                    info!(signature, tablet_id = req.tablet_id, "recovered tablet");
                    TaskOutcome::ok()
                }
                Err(error) => {
                    warn!(signature, tablet_id = req.tablet_id, %error, "failed to recover tablet");
                    TaskOutcome::error(
                        StatusCode::RuntimeError,
                        format!("recover tablet failed: {error}"),
                    )
                }
            }
        }
    })
}
