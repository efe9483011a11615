use serde::{Deserialize, Serialize};

use crate::engine::types::*;

/// Every directive kind the coordinator can hand to this node. The three
/// `Report*` kinds name the singleton reporter loops; they carry no queue
/// and reject direct submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    CreateTablet,
    DropTablet,
    Push,
    RealtimePush,
    Delete,
    AlterTablet,
    PublishVersion,
    ClearAlterTask,
    ClearTransactionTask,
    Clone,
    StorageMediumMigrate,
    CheckConsistency,
    ReportTask,
    ReportDisk,
    ReportTablet,
    Upload,
    Download,
    MakeSnapshot,
    ReleaseSnapshot,
    MoveDir,
    RecoverTablet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Normal,
    High,
}

/// One task as submitted by the coordinator. `signature` is the
/// coordinator-assigned dedup key, unique per (kind, signature).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskRequest {
    pub kind: TaskKind,
    pub signature: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub payload: TaskPayload,
}

impl AgentTaskRequest {
    /// Tenant identity for accounting; tasks without one share the
    /// anonymous bucket.
    pub fn effective_user(&self) -> &str {
        self.user.as_deref().unwrap_or("")
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority == Some(Priority::High)
    }
}

/// Kind-specific payload. Exactly one variant per queued task kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskPayload {
    CreateTablet(CreateTabletReq),
    DropTablet(DropTabletReq),
    Push(PushReq),
    AlterTablet(AlterTabletReq),
    PublishVersion(PublishVersionReq),
    ClearAlterTask(ClearAlterTaskReq),
    ClearTransactionTask(ClearTransactionReq),
    Clone(CloneReq),
    StorageMediumMigrate(StorageMediumMigrateReq),
    CheckConsistency(CheckConsistencyReq),
    Upload(UploadReq),
    Download(DownloadReq),
    MakeSnapshot(SnapshotReq),
    ReleaseSnapshot(ReleaseSnapshotReq),
    MoveDir(MoveDirReq),
    RecoverTablet(RecoverTabletReq),
}

/// This node's identity as attached to every coordinator message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendIdentity {
    pub host: String,
    pub be_port: u16,
    pub http_port: u16,
}
