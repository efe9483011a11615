use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::metrics::MetricsSnapshot;
use super::types::{AgentTaskRequest, BackendIdentity, TaskKind};
use crate::engine::types::TabletInfo;

// Endpoints served by this node
pub const ENDPOINT_SUBMIT_TASK: &str = "/agent/submit_task";
pub const ENDPOINT_HEARTBEAT: &str = "/agent/heartbeat";
pub const ENDPOINT_AGENT_STATS: &str = "/agent/stats";

// Endpoints on the coordinator
pub const ENDPOINT_FINISH_TASK: &str = "/finish_task";
pub const ENDPOINT_REPORT: &str = "/report";

/// Wire-visible status classification for a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    AnalysisError,
    RuntimeError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status_code: StatusCode,
    pub error_msgs: Vec<String>,
}

impl TaskStatus {
    pub fn ok() -> Self {
        Self {
            status_code: StatusCode::Ok,
            error_msgs: Vec::new(),
        }
    }

    pub fn error(status_code: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status_code,
            error_msgs: vec![msg.into()],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == StatusCode::Ok
    }
}

/// Kind-dependent extras carried by a finish message. Every field is
/// omitted from the wire when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinishExtras {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_tablet_infos: Option<Vec<TabletInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_version_hash: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tablet_checksum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_tablet_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tablet_files: Option<HashMap<i64, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_tablet_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishTaskRequest {
    pub backend: BackendIdentity,
    pub task_kind: TaskKind,
    pub signature: i64,
    pub task_status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_version: Option<u64>,
    #[serde(flatten)]
    pub extras: FinishExtras,
}

/// One disk record in a disk report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskReport {
    pub root_path: String,
    pub path_hash: i64,
    pub disk_total_capacity: u64,
    pub data_used_capacity: u64,
    pub disk_available_capacity: u64,
    pub used: bool,
}

/// Periodic report to the coordinator. Exactly one of `tasks`, `disks`,
/// `tablets` is set per report flavor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub backend: BackendIdentity,
    pub force_recovery: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<BTreeMap<TaskKind, BTreeSet<i64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disks: Option<BTreeMap<String, DiskReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tablets: Option<Vec<TabletInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_version: Option<u64>,
}

impl ReportRequest {
    pub fn new(backend: BackendIdentity, force_recovery: bool) -> Self {
        Self {
            backend,
            force_recovery,
            tasks: None,
            disks: None,
            tablets: None,
            report_version: None,
        }
    }
}

/// Coordinator acknowledgement for finish/report calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterResult {
    pub status: TaskStatus,
}

// Submit task (coordinator -> BE)
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub task: AgentTaskRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub signature: i64,
    pub duplicate: bool,
}

// Heartbeat (coordinator -> BE), pushes the coordinator's own address
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub master_addr: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentStatsResponse {
    pub report_version: u64,
    pub pending: BTreeMap<TaskKind, usize>,
    pub metrics: MetricsSnapshot,
}
