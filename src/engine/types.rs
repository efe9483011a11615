use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage medium a tablet lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMedium {
    Hdd,
    Ssd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTabletReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub partition_id: i64,
    pub version: i64,
    pub version_hash: i64,
    pub storage_medium: StorageMedium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropTabletReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
}

/// Push sub-mode. `Delete` applies a delete predicate instead of a load;
/// anything the coordinator sends that this build does not know maps to
/// `Unknown` and is rejected as a malformed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushType {
    Load,
    Delete,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub version: i64,
    pub version_hash: i64,
    pub push_type: PushType,
    pub http_file_path: Option<String>,
}

/// Alter sub-kind carried inside the alter payload. Unknown values survive
/// deserialization so the worker can answer them with an analysis error
/// instead of dropping the request on the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlterKind {
    SchemaChange,
    Rollup,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterTabletReq {
    pub base_tablet_id: i64,
    pub base_schema_hash: i64,
    pub alter_kind: AlterKind,
    pub new_tablet_req: CreateTabletReq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionVersionInfo {
    pub partition_id: i64,
    pub version: i64,
    pub version_hash: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishVersionReq {
    pub transaction_id: i64,
    pub partition_version_infos: Vec<PartitionVersionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearAlterTaskReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearTransactionReq {
    pub transaction_id: i64,
    pub partition_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub partition_id: i64,
    pub version: i64,
    pub version_hash: i64,
    pub src_backends: Vec<String>,
    pub storage_medium: StorageMedium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMediumMigrateReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub storage_medium: StorageMedium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConsistencyReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub version: i64,
    pub version_hash: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub version: i64,
    pub version_hash: i64,
    pub list_files: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSnapshotReq {
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReq {
    pub job_id: i64,
    pub src_dest_map: HashMap<String, String>,
    pub broker_addr: String,
    pub broker_prop: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReq {
    pub job_id: i64,
    pub src_dest_map: HashMap<String, String>,
    pub broker_addr: String,
    pub broker_prop: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveDirReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub src: String,
    pub job_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverTabletReq {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub version: i64,
    pub version_hash: i64,
}

/// Tablet state as reported to the coordinator and attached to finish
/// messages for create/push/alter/clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabletInfo {
    pub tablet_id: i64,
    pub schema_hash: i64,
    pub version: i64,
    pub version_hash: i64,
    pub row_count: u64,
    pub data_size: u64,
}

/// One data directory as the engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataDirInfo {
    pub path: String,
    pub path_hash: i64,
    pub capacity: u64,
    pub data_used_capacity: u64,
    pub available: u64,
    pub is_used: bool,
}

/// Where a tablet's files live, as resolved by the tablet manager.
#[derive(Debug, Clone)]
pub struct TabletLocation {
    pub dir_path: String,
    pub store_path: String,
}
