use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, exposed through the stats endpoint.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    pub tasks_submitted: AtomicU64,
    pub tasks_duplicated: AtomicU64,
    pub finish_task_requests_total: AtomicU64,
    pub finish_task_requests_failed: AtomicU64,
    pub report_task_requests_total: AtomicU64,
    pub report_task_requests_failed: AtomicU64,
    pub report_disk_requests_total: AtomicU64,
    pub report_disk_requests_failed: AtomicU64,
    pub report_tablet_requests_failed: AtomicU64,
    pub clone_requests_total: AtomicU64,
    pub clone_requests_failed: AtomicU64,
}

impl AgentMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_duplicated: self.tasks_duplicated.load(Ordering::Relaxed),
            finish_task_requests_total: self.finish_task_requests_total.load(Ordering::Relaxed),
            finish_task_requests_failed: self.finish_task_requests_failed.load(Ordering::Relaxed),
            report_task_requests_total: self.report_task_requests_total.load(Ordering::Relaxed),
            report_task_requests_failed: self.report_task_requests_failed.load(Ordering::Relaxed),
            report_disk_requests_total: self.report_disk_requests_total.load(Ordering::Relaxed),
            report_disk_requests_failed: self.report_disk_requests_failed.load(Ordering::Relaxed),
            report_tablet_requests_failed: self
                .report_tablet_requests_failed
                .load(Ordering::Relaxed),
            clone_requests_total: self.clone_requests_total.load(Ordering::Relaxed),
            clone_requests_failed: self.clone_requests_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_duplicated: u64,
    pub finish_task_requests_total: u64,
    pub finish_task_requests_failed: u64,
    pub report_task_requests_total: u64,
    pub report_task_requests_failed: u64,
    pub report_disk_requests_total: u64,
    pub report_disk_requests_failed: u64,
    pub report_tablet_requests_failed: u64,
    pub clone_requests_total: u64,
    pub clone_requests_failed: u64,
}
