//! In-process storage engine.
//!
//! Backs the standalone binary and the test suite: tablets live in a
//! `DashMap`, disk capacities come from `sysinfo` against the configured
//! data roots, and the two reporter wakeup channels are `Notify` pairs.
//! One struct implements all four collaborator contracts so callers can
//! clone a single `Arc` into each seam.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::Disks;
use tokio::sync::Notify;
use uuid::Uuid;

use super::types::*;
use super::{EngineError, EngineResult, ReportChannel};
use super::{SnapshotLoader, SnapshotManager, StorageEngine, TabletManager};

#[derive(Debug, Clone)]
struct TabletMeta {
    tablet_id: i64,
    schema_hash: i64,
    partition_id: i64,
    version: i64,
    version_hash: i64,
    row_count: u64,
    data_size: u64,
    storage_medium: StorageMedium,
    data_root: String,
}

impl TabletMeta {
    fn info(&self) -> TabletInfo {
        TabletInfo {
            tablet_id: self.tablet_id,
            schema_hash: self.schema_hash,
            version: self.version,
            version_hash: self.version_hash,
            row_count: self.row_count,
            data_size: self.data_size,
        }
    }
}

#[derive(Debug, Clone)]
struct SnapshotRecord {
    tablet_id: i64,
    schema_hash: i64,
    files: Vec<String>,
}

/// Loader operations recorded for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderOp {
    Upload {
        job_id: i64,
    },
    Download {
        job_id: i64,
    },
    Move {
        src: String,
        dest_tablet_dir: String,
        store_path: String,
        job_id: i64,
        overwrite: bool,
    },
}

pub struct MemoryEngine {
    tablets: DashMap<(i64, i64), TabletMeta>,
    loaded_signatures: DashMap<i64, ()>,
    snapshots: DashMap<String, SnapshotRecord>,
    data_roots: Vec<String>,
    next_root: AtomicUsize,
    disk_notify: Notify,
    tablet_notify: Notify,
    loader_ops: Mutex<Vec<LoaderOp>>,
    // failure injection for tests and drills
    publish_failures: AtomicU32,
    tablet_report_error: AtomicBool,
}

impl MemoryEngine {
    pub fn new(data_roots: Vec<String>) -> Self {
        let data_roots = if data_roots.is_empty() {
            vec!["./data".to_string()]
        } else {
            data_roots
        };
        Self {
            tablets: DashMap::new(),
            loaded_signatures: DashMap::new(),
            snapshots: DashMap::new(),
            data_roots,
            next_root: AtomicUsize::new(0),
            disk_notify: Notify::new(),
            tablet_notify: Notify::new(),
            loader_ops: Mutex::new(Vec::new()),
            publish_failures: AtomicU32::new(0),
            tablet_report_error: AtomicBool::new(false),
        }
    }

    pub fn notify_disk_change(&self) {
        self.disk_notify.notify_waiters();
    }

    pub fn notify_tablet_change(&self) {
        self.tablet_notify.notify_waiters();
    }

    /// Make the next `count` publish attempts fail.
    pub fn set_publish_failures(&self, count: u32) {
        self.publish_failures.store(count, Ordering::SeqCst);
    }

    /// Make tablet catalogue retrieval fail until cleared.
    pub fn set_tablet_report_error(&self, fail: bool) {
        self.tablet_report_error.store(fail, Ordering::SeqCst);
    }

    pub fn tablet_version(&self, tablet_id: i64, schema_hash: i64) -> Option<i64> {
        self.tablets
            .get(&(tablet_id, schema_hash))
            .map(|meta| meta.version)
    }

    pub fn tablet_count(&self) -> usize {
        self.tablets.len()
    }

    pub fn loader_ops(&self) -> Vec<LoaderOp> {
        self.loader_ops.lock().expect("loader ops lock").clone()
    }

    fn pick_root(&self) -> String {
        let index = self.next_root.fetch_add(1, Ordering::Relaxed) % self.data_roots.len();
        self.data_roots[index].clone()
    }

    fn record_op(&self, op: LoaderOp) {
        self.loader_ops.lock().expect("loader ops lock").push(op);
    }
}

fn path_hash(path: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish() as i64
}

/// Tablet ids embedded in loader paths, e.g. `.../10021/1385/`.
fn tablet_ids_in_paths<'a>(paths: impl Iterator<Item = &'a String>) -> Vec<i64> {
    let mut ids: Vec<i64> = paths
        .flat_map(|p| p.split('/').filter_map(|seg| seg.parse::<i64>().ok()))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn create_tablet(&self, req: &CreateTabletReq) -> EngineResult<()> {
        let key = (req.tablet_id, req.schema_hash);
        if self.tablets.contains_key(&key) {
            return Err(EngineError::InvalidRequest(format!(
                "tablet {}.{} already exists",
                req.tablet_id, req.schema_hash
            )));
        }
        self.tablets.insert(
            key,
            TabletMeta {
                tablet_id: req.tablet_id,
                schema_hash: req.schema_hash,
                partition_id: req.partition_id,
                version: req.version,
                version_hash: req.version_hash,
                row_count: 0,
                data_size: 0,
                storage_medium: req.storage_medium,
                data_root: self.pick_root(),
            },
        );
        self.notify_tablet_change();
        Ok(())
    }

    async fn drop_tablet(&self, tablet_id: i64, schema_hash: i64) -> EngineResult<()> {
        if self.tablets.remove(&(tablet_id, schema_hash)).is_none() {
            return Err(EngineError::not_found(tablet_id, schema_hash));
        }
        self.notify_tablet_change();
        Ok(())
    }

    async fn batch_load(&self, signature: i64, req: &PushReq) -> EngineResult<Vec<TabletInfo>> {
        if req.push_type == PushType::Unknown {
            return Err(EngineError::InvalidRequest(
                "push request push type invalid".to_string(),
            ));
        }
        if self.loaded_signatures.contains_key(&signature) {
            return Err(EngineError::AlreadyLoaded(signature));
        }
        let mut meta = self
            .tablets
            .get_mut(&(req.tablet_id, req.schema_hash))
            .ok_or_else(|| EngineError::not_found(req.tablet_id, req.schema_hash))?;
        meta.version = req.version;
        meta.version_hash = req.version_hash;
        if req.push_type == PushType::Load {
            meta.row_count += 1;
            meta.data_size += 1024;
        }
        let info = meta.info();
        drop(meta);
        self.loaded_signatures.insert(signature, ());
        self.notify_tablet_change();
        Ok(vec![info])
    }

    async fn alter_tablet(&self, req: &AlterTabletReq) -> EngineResult<()> {
        if !self
            .tablets
            .contains_key(&(req.base_tablet_id, req.base_schema_hash))
        {
            return Err(EngineError::not_found(
                req.base_tablet_id,
                req.base_schema_hash,
            ));
        }
        let new = &req.new_tablet_req;
        self.tablets.insert(
            (new.tablet_id, new.schema_hash),
            TabletMeta {
                tablet_id: new.tablet_id,
                schema_hash: new.schema_hash,
                partition_id: new.partition_id,
                version: new.version,
                version_hash: new.version_hash,
                row_count: 0,
                data_size: 0,
                storage_medium: new.storage_medium,
                data_root: self.pick_root(),
            },
        );
        self.notify_tablet_change();
        Ok(())
    }

    async fn publish_version(
        &self,
        req: &PublishVersionReq,
        error_tablet_ids: &mut Vec<i64>,
    ) -> EngineResult<()> {
        if self.publish_failures.load(Ordering::SeqCst) > 0 {
            self.publish_failures.fetch_sub(1, Ordering::SeqCst);
            for info in &req.partition_version_infos {
                for entry in self.tablets.iter() {
                    if entry.partition_id == info.partition_id {
                        error_tablet_ids.push(entry.tablet_id);
                    }
                }
            }
            return Err(EngineError::Internal(format!(
                "publish rejected for transaction {}",
                req.transaction_id
            )));
        }
        for info in &req.partition_version_infos {
            for mut entry in self.tablets.iter_mut() {
                if entry.partition_id == info.partition_id {
                    entry.version = info.version;
                    entry.version_hash = info.version_hash;
                }
            }
        }
        self.notify_tablet_change();
        Ok(())
    }

    async fn clear_alter_task(&self, _req: &ClearAlterTaskReq) -> EngineResult<()> {
        Ok(())
    }

    async fn clear_transaction_task(&self, transaction_id: i64, partition_id: i64) {
        tracing::debug!(transaction_id, partition_id, "cleared transaction state");
    }

    async fn clone_tablet(&self, req: &CloneReq) -> EngineResult<Vec<TabletInfo>> {
        let key = (req.tablet_id, req.schema_hash);
        if let Some(existing) = self.tablets.get(&key) {
            // An already materialized replica counts as a successful clone.
            return Ok(vec![existing.info()]);
        }
        let meta = TabletMeta {
            tablet_id: req.tablet_id,
            schema_hash: req.schema_hash,
            partition_id: req.partition_id,
            version: req.version,
            version_hash: req.version_hash,
            row_count: 0,
            data_size: 0,
            storage_medium: req.storage_medium,
            data_root: self.pick_root(),
        };
        let info = meta.info();
        self.tablets.insert(key, meta);
        self.notify_tablet_change();
        Ok(vec![info])
    }

    async fn storage_medium_migrate(&self, req: &StorageMediumMigrateReq) -> EngineResult<()> {
        let mut meta = self
            .tablets
            .get_mut(&(req.tablet_id, req.schema_hash))
            .ok_or_else(|| EngineError::not_found(req.tablet_id, req.schema_hash))?;
        meta.storage_medium = req.storage_medium;
        Ok(())
    }

    async fn check_consistency(&self, req: &CheckConsistencyReq) -> EngineResult<u32> {
        let meta = self
            .tablets
            .get(&(req.tablet_id, req.schema_hash))
            .ok_or_else(|| EngineError::not_found(req.tablet_id, req.schema_hash))?;
        let mut checksum = meta.tablet_id as u32;
        checksum = checksum
            .wrapping_mul(31)
            .wrapping_add(meta.version as u32);
        checksum = checksum
            .wrapping_mul(31)
            .wrapping_add(meta.row_count as u32);
        Ok(checksum)
    }

    async fn recover_tablet(&self, req: &RecoverTabletReq) -> EngineResult<()> {
        let mut meta = self
            .tablets
            .get_mut(&(req.tablet_id, req.schema_hash))
            .ok_or_else(|| EngineError::not_found(req.tablet_id, req.schema_hash))?;
        meta.version = req.version;
        meta.version_hash = req.version_hash;
        drop(meta);
        self.notify_tablet_change();
        Ok(())
    }

    async fn data_dir_infos(&self) -> Vec<DataDirInfo> {
        let disks = Disks::new_with_refreshed_list();
        self.data_roots
            .iter()
            .map(|root| {
                // Best mount-point match for the root, longest prefix wins.
                let mounted = disks
                    .iter()
                    .filter(|disk| root.starts_with(&*disk.mount_point().to_string_lossy()))
                    .max_by_key(|disk| disk.mount_point().to_string_lossy().len());
                let (capacity, available) = mounted
                    .map(|disk| (disk.total_space(), disk.available_space()))
                    .unwrap_or((0, 0));
                let data_used_capacity = self
                    .tablets
                    .iter()
                    .filter(|entry| entry.data_root == *root)
                    .map(|entry| entry.data_size)
                    .sum();
                DataDirInfo {
                    path: root.clone(),
                    path_hash: path_hash(root),
                    capacity,
                    data_used_capacity,
                    available,
                    is_used: true,
                }
            })
            .collect()
    }

    async fn all_tablets(&self) -> EngineResult<Vec<TabletInfo>> {
        if self.tablet_report_error.load(Ordering::SeqCst) {
            return Err(EngineError::Internal(
                "tablet catalogue unavailable".to_string(),
            ));
        }
        let mut infos: Vec<TabletInfo> = self.tablets.iter().map(|entry| entry.info()).collect();
        infos.sort_by_key(|info| (info.tablet_id, info.schema_hash));
        Ok(infos)
    }

    async fn wait_report_notify(&self, timeout: Duration, channel: ReportChannel) {
        let notified = match channel {
            ReportChannel::Disk => self.disk_notify.notified(),
            ReportChannel::Tablet => self.tablet_notify.notified(),
        };
        let _ = tokio::time::timeout(timeout, notified).await;
    }
}

#[async_trait]
impl TabletManager for MemoryEngine {
    async fn get_tablet(&self, tablet_id: i64, schema_hash: i64) -> Option<TabletLocation> {
        self.tablets
            .get(&(tablet_id, schema_hash))
            .map(|meta| TabletLocation {
                dir_path: format!("{}/{}/{}", meta.data_root, tablet_id, schema_hash),
                store_path: meta.data_root.clone(),
            })
    }

    async fn tablet_info(&self, tablet_id: i64, schema_hash: i64) -> EngineResult<TabletInfo> {
        self.tablets
            .get(&(tablet_id, schema_hash))
            .map(|meta| meta.info())
            .ok_or_else(|| EngineError::not_found(tablet_id, schema_hash))
    }
}

#[async_trait]
impl SnapshotManager for MemoryEngine {
    async fn make_snapshot(&self, req: &SnapshotReq) -> EngineResult<String> {
        let meta = self
            .tablets
            .get(&(req.tablet_id, req.schema_hash))
            .ok_or_else(|| EngineError::not_found(req.tablet_id, req.schema_hash))?;
        let snapshot_path = format!("{}/snapshot/{}", meta.data_root, Uuid::new_v4());
        self.snapshots.insert(
            snapshot_path.clone(),
            SnapshotRecord {
                tablet_id: req.tablet_id,
                schema_hash: req.schema_hash,
                files: vec![
                    format!("{}.hdr", req.tablet_id),
                    format!("{}_{}.dat", req.tablet_id, req.version),
                ],
            },
        );
        Ok(snapshot_path)
    }

    async fn release_snapshot(&self, snapshot_path: &str) -> EngineResult<()> {
        self.snapshots
            .remove(snapshot_path)
            .map(|_| ())
            .ok_or_else(|| {
                EngineError::InvalidRequest(format!("no snapshot at {snapshot_path}"))
            })
    }

    async fn list_snapshot_files(&self, dir: &str) -> EngineResult<Vec<String>> {
        let record = self
            .snapshots
            .iter()
            .find(|entry| dir.starts_with(entry.key().as_str()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::Internal(format!("no snapshot directory {dir}")))?;
        let expected_subdir = format!("{}/{}", record.tablet_id, record.schema_hash);
        if !dir.contains(&expected_subdir) {
            return Err(EngineError::Internal(format!(
                "snapshot directory {dir} does not match tablet {}.{}",
                record.tablet_id, record.schema_hash
            )));
        }
        Ok(record.files)
    }
}

#[async_trait]
impl SnapshotLoader for MemoryEngine {
    async fn upload(&self, req: &UploadReq) -> EngineResult<HashMap<i64, Vec<String>>> {
        self.record_op(LoaderOp::Upload { job_id: req.job_id });
        let mut tablet_files = HashMap::new();
        for id in tablet_ids_in_paths(req.src_dest_map.keys()) {
            tablet_files.insert(id, vec![format!("{id}.hdr"), format!("{id}_0.dat")]);
        }
        Ok(tablet_files)
    }

    async fn download(&self, req: &DownloadReq) -> EngineResult<Vec<i64>> {
        self.record_op(LoaderOp::Download { job_id: req.job_id });
        Ok(tablet_ids_in_paths(req.src_dest_map.values()))
    }

    async fn move_dir(
        &self,
        src: &str,
        dest_tablet_dir: &str,
        store_path: &str,
        job_id: i64,
        overwrite: bool,
    ) -> EngineResult<()> {
        self.record_op(LoaderOp::Move {
            src: src.to_string(),
            dest_tablet_dir: dest_tablet_dir.to_string(),
            store_path: store_path.to_string(),
            job_id,
            overwrite,
        });
        Ok(())
    }
}
