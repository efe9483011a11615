//! Contracts between the agent worker pools and the storage layer.
//!
//! The worker pools never touch tablet files directly; everything goes
//! through these four narrow capabilities, injected as `Arc<dyn …>` at
//! service construction:
//!
//! - **`StorageEngine`**: tablet lifecycle primitives plus the bounded-wait
//!   wakeup the periodic reporters block on.
//! - **`TabletManager`**: tablet lookup and per-tablet report records.
//! - **`SnapshotManager`**: snapshot make/release and file listing.
//! - **`SnapshotLoader`**: remote upload/download and directory moves.
//!
//! `memory` provides an in-process implementation of all four, used by the
//! binary and by the tests.

pub mod memory;
pub mod types;


use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub use types::*;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The addressed tablet does not exist on this node.
    #[error("tablet {tablet_id}.{schema_hash} not found")]
    TabletNotFound { tablet_id: i64, schema_hash: i64 },

    /// The request itself is malformed (bad push type, bad target).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The batch for this signature was already applied; replays are
    /// acknowledged locally and never reported back to the coordinator.
    #[error("batch for signature {0} already loaded")]
    AlreadyLoaded(i64),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(tablet_id: i64, schema_hash: i64) -> Self {
        Self::TabletNotFound {
            tablet_id,
            schema_hash,
        }
    }
}

/// Which reporter wakeup channel a state change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportChannel {
    Disk,
    Tablet,
}

#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn create_tablet(&self, req: &CreateTabletReq) -> EngineResult<()>;

    async fn drop_tablet(&self, tablet_id: i64, schema_hash: i64) -> EngineResult<()>;

    /// Apply one push batch. `signature` identifies the batch for replay
    /// detection; a replay returns `EngineError::AlreadyLoaded`.
    async fn batch_load(&self, signature: i64, req: &PushReq) -> EngineResult<Vec<TabletInfo>>;

    async fn alter_tablet(&self, req: &AlterTabletReq) -> EngineResult<()>;

    /// Commit staged versions. Tablets that failed to publish are appended
    /// to `error_tablet_ids` regardless of the returned status.
    async fn publish_version(
        &self,
        req: &PublishVersionReq,
        error_tablet_ids: &mut Vec<i64>,
    ) -> EngineResult<()>;

    async fn clear_alter_task(&self, req: &ClearAlterTaskReq) -> EngineResult<()>;

    async fn clear_transaction_task(&self, transaction_id: i64, partition_id: i64);

    async fn clone_tablet(&self, req: &CloneReq) -> EngineResult<Vec<TabletInfo>>;

    async fn storage_medium_migrate(&self, req: &StorageMediumMigrateReq) -> EngineResult<()>;

    async fn check_consistency(&self, req: &CheckConsistencyReq) -> EngineResult<u32>;

    async fn recover_tablet(&self, req: &RecoverTabletReq) -> EngineResult<()>;

    async fn data_dir_infos(&self) -> Vec<DataDirInfo>;

    async fn all_tablets(&self) -> EngineResult<Vec<TabletInfo>>;

    /// Block until the engine signals a meaningful change on `channel` or
    /// `timeout` elapses, whichever comes first.
    async fn wait_report_notify(&self, timeout: Duration, channel: ReportChannel);
}

#[async_trait]
pub trait TabletManager: Send + Sync {
    async fn get_tablet(&self, tablet_id: i64, schema_hash: i64) -> Option<TabletLocation>;

    async fn tablet_info(&self, tablet_id: i64, schema_hash: i64) -> EngineResult<TabletInfo>;
}

#[async_trait]
pub trait SnapshotManager: Send + Sync {
    /// Produce a snapshot and return its path under the data root.
    async fn make_snapshot(&self, req: &SnapshotReq) -> EngineResult<String>;

    async fn release_snapshot(&self, snapshot_path: &str) -> EngineResult<()>;

    /// List the file names under a produced snapshot directory.
    async fn list_snapshot_files(&self, dir: &str) -> EngineResult<Vec<String>>;
}

#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    /// Upload snapshot files to remote storage; returns the uploaded file
    /// names keyed by tablet id.
    async fn upload(&self, req: &UploadReq) -> EngineResult<HashMap<i64, Vec<String>>>;

    /// Download snapshot files from remote storage; returns the tablet ids
    /// that were fully downloaded.
    async fn download(&self, req: &DownloadReq) -> EngineResult<Vec<i64>>;

    async fn move_dir(
        &self,
        src: &str,
        dest_tablet_dir: &str,
        store_path: &str,
        job_id: i64,
        overwrite: bool,
    ) -> EngineResult<()>;
}
