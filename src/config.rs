//! Agent configuration.
//!
//! Every knob is read from the environment with a parse-or-default fallback,
//! so a bare `backend-agent --bind ...` comes up with sane worker counts and
//! report intervals. `Default` mirrors `from_env` with no variables set,
//! which is what the tests build on.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub create_tablet_worker_count: u32,
    pub drop_tablet_worker_count: u32,
    pub push_worker_count_normal_priority: u32,
    pub push_worker_count_high_priority: u32,
    pub publish_version_worker_count: u32,
    pub clear_alter_task_worker_count: u32,
    pub clear_transaction_task_worker_count: u32,
    pub delete_worker_count: u32,
    pub alter_tablet_worker_count: u32,
    pub clone_worker_count: u32,
    pub storage_medium_migrate_count: u32,
    pub check_consistency_worker_count: u32,
    pub upload_worker_count: u32,
    pub download_worker_count: u32,
    pub make_snapshot_worker_count: u32,
    pub release_snapshot_worker_count: u32,
    pub report_task_interval_seconds: u64,
    pub report_disk_state_interval_seconds: u64,
    pub report_tablet_interval_seconds: u64,
    pub sleep_one_second: u64,
    pub force_recovery: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            create_tablet_worker_count: 3,
            drop_tablet_worker_count: 3,
            push_worker_count_normal_priority: 3,
            push_worker_count_high_priority: 1,
            publish_version_worker_count: 2,
            clear_alter_task_worker_count: 1,
            clear_transaction_task_worker_count: 1,
            delete_worker_count: 3,
            alter_tablet_worker_count: 3,
            clone_worker_count: 3,
            storage_medium_migrate_count: 1,
            check_consistency_worker_count: 1,
            upload_worker_count: 1,
            download_worker_count: 1,
            make_snapshot_worker_count: 5,
            release_snapshot_worker_count: 5,
            report_task_interval_seconds: 10,
            report_disk_state_interval_seconds: 60,
            report_tablet_interval_seconds: 60,
            sleep_one_second: 1,
            force_recovery: false,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            create_tablet_worker_count: env_u32(
                "CREATE_TABLET_WORKER_COUNT",
                defaults.create_tablet_worker_count,
            ),
            drop_tablet_worker_count: env_u32(
                "DROP_TABLET_WORKER_COUNT",
                defaults.drop_tablet_worker_count,
            ),
            push_worker_count_normal_priority: env_u32(
                "PUSH_WORKER_COUNT_NORMAL_PRIORITY",
                defaults.push_worker_count_normal_priority,
            ),
            push_worker_count_high_priority: env_u32(
                "PUSH_WORKER_COUNT_HIGH_PRIORITY",
                defaults.push_worker_count_high_priority,
            ),
            publish_version_worker_count: env_u32(
                "PUBLISH_VERSION_WORKER_COUNT",
                defaults.publish_version_worker_count,
            ),
            clear_alter_task_worker_count: env_u32(
                "CLEAR_ALTER_TASK_WORKER_COUNT",
                defaults.clear_alter_task_worker_count,
            ),
            clear_transaction_task_worker_count: env_u32(
                "CLEAR_TRANSACTION_TASK_WORKER_COUNT",
                defaults.clear_transaction_task_worker_count,
            ),
            delete_worker_count: env_u32("DELETE_WORKER_COUNT", defaults.delete_worker_count),
            alter_tablet_worker_count: env_u32(
                "ALTER_TABLET_WORKER_COUNT",
                defaults.alter_tablet_worker_count,
            ),
            clone_worker_count: env_u32("CLONE_WORKER_COUNT", defaults.clone_worker_count),
            storage_medium_migrate_count: env_u32(
                "STORAGE_MEDIUM_MIGRATE_COUNT",
                defaults.storage_medium_migrate_count,
            ),
            check_consistency_worker_count: env_u32(
                "CHECK_CONSISTENCY_WORKER_COUNT",
                defaults.check_consistency_worker_count,
            ),
            upload_worker_count: env_u32("UPLOAD_WORKER_COUNT", defaults.upload_worker_count),
            download_worker_count: env_u32("DOWNLOAD_WORKER_COUNT", defaults.download_worker_count),
            make_snapshot_worker_count: env_u32(
                "MAKE_SNAPSHOT_WORKER_COUNT",
                defaults.make_snapshot_worker_count,
            ),
            release_snapshot_worker_count: env_u32(
                "RELEASE_SNAPSHOT_WORKER_COUNT",
                defaults.release_snapshot_worker_count,
            ),
            report_task_interval_seconds: env_u64(
                "REPORT_TASK_INTERVAL_SECONDS",
                defaults.report_task_interval_seconds,
            ),
            report_disk_state_interval_seconds: env_u64(
                "REPORT_DISK_STATE_INTERVAL_SECONDS",
                defaults.report_disk_state_interval_seconds,
            ),
            report_tablet_interval_seconds: env_u64(
                "REPORT_TABLET_INTERVAL_SECONDS",
                defaults.report_tablet_interval_seconds,
            ),
            sleep_one_second: env_u64("SLEEP_ONE_SECOND", defaults.sleep_one_second),
            force_recovery: env_bool("FORCE_RECOVERY", defaults.force_recovery),
        }
    }

    /// The unconditional short sleep used by retry loops and heartbeat waits.
    pub fn sleep_one(&self) -> Duration {
        Duration::from_secs(self.sleep_one_second)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|value| match value.as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}
