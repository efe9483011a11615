//! Periodic coordinator reports.
//!
//! Three singleton loops: the task inventory on a fixed interval, and the
//! disk/tablet reports on a bounded wait that the storage engine can cut
//! short when state changes. None of them send anything until a heartbeat
//! has told us where the coordinator lives; report errors are logged and
//! counted, never fatal.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::pool::AgentShared;
use super::protocol::{DiskReport, ReportRequest};
use crate::engine::{ReportChannel, StorageEngine};

pub(crate) async fn run_task_reporter(shared: Arc<AgentShared>) {
    let interval = Duration::from_secs(shared.config.report_task_interval_seconds);
    loop {
        if !shared.master_state.is_known() {
            info!("waiting to receive first heartbeat from coordinator");
            tokio::time::sleep(shared.config.sleep_one()).await;
            continue;
        }

        let mut request =
            ReportRequest::new(shared.backend.clone(), shared.config.force_recovery);
        request.tasks = Some(shared.ledger.pending_snapshot());

        shared
            .metrics
            .report_task_requests_total
            .fetch_add(1, Ordering::Relaxed);
        if let Err(error) = shared.master.report(&request).await {
            shared
                .metrics
                .report_task_requests_failed
                .fetch_add(1, Ordering::Relaxed);
            warn!(%error, "task report failed");
        }

        tokio::time::sleep(interval).await;
    }
}

pub(crate) async fn run_disk_reporter(shared: Arc<AgentShared>, engine: Arc<dyn StorageEngine>) {
    let interval = Duration::from_secs(shared.config.report_disk_state_interval_seconds);
    loop {
        if !shared.master_state.is_known() {
            info!("waiting to receive first heartbeat from coordinator");
            tokio::time::sleep(shared.config.sleep_one()).await;
            continue;
        }

        let mut disks = BTreeMap::new();
        for dir in engine.data_dir_infos().await {
            disks.insert(
                dir.path.clone(),
                DiskReport {
                    root_path: dir.path,
                    path_hash: dir.path_hash,
                    disk_total_capacity: dir.capacity,
                    data_used_capacity: dir.data_used_capacity,
                    disk_available_capacity: dir.available,
                    used: dir.is_used,
                },
            );
        }
        let mut request =
            ReportRequest::new(shared.backend.clone(), shared.config.force_recovery);
        request.disks = Some(disks);

        shared
            .metrics
            .report_disk_requests_total
            .fetch_add(1, Ordering::Relaxed);
        if let Err(error) = shared.master.report(&request).await {
            shared
                .metrics
                .report_disk_requests_failed
                .fetch_add(1, Ordering::Relaxed);
            warn!(%error, "disk report failed");
        }

        engine.wait_report_notify(interval, ReportChannel::Disk).await;
    }
}

pub(crate) async fn run_tablet_reporter(shared: Arc<AgentShared>, engine: Arc<dyn StorageEngine>) {
    let interval = Duration::from_secs(shared.config.report_tablet_interval_seconds);
    loop {
        if !shared.master_state.is_known() {
            info!("waiting to receive first heartbeat from coordinator");
            tokio::time::sleep(shared.config.sleep_one()).await;
            continue;
        }

        let mut request =
            ReportRequest::new(shared.backend.clone(), shared.config.force_recovery);
        request.report_version = Some(shared.report_version.current());
        match engine.all_tablets().await {
            Ok(tablets) => request.tablets = Some(tablets),
            Err(error) => {
                // Skip this round rather than report a partial view.
                warn!(%error, "tablet catalogue retrieval failed, skipping report");
                engine
                    .wait_report_notify(interval, ReportChannel::Tablet)
                    .await;
                continue;
            }
        }

        if let Err(error) = shared.master.report(&request).await {
            shared
                .metrics
                .report_tablet_requests_failed
                .fetch_add(1, Ordering::Relaxed);
            warn!(%error, "tablet report failed");
        }

        engine
            .wait_report_notify(interval, ReportChannel::Tablet)
            .await;
    }
}
