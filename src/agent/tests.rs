//! Agent Module Tests
//!
//! This module contains unit and integration tests for the task worker
//! subsystem.
//!
//! ## Test Scopes
//! - **Ledger**: signature dedup, push accounting, clamping, report version.
//! - **Scheduler**: priority bands and per-tenant fair-share selection.
//! - **Pools**: submission round trips, completion protocol, per-kind
//!   handler behavior, driven through the in-memory engine and a recording
//!   coordinator client.
//! - **Reporters**: heartbeat gating, wakeup channels, failure skipping.

#[cfg(test)]
mod tests {
    use crate::agent::ledger::{ReportVersion, TaskLedger};
    use crate::agent::master::{MasterClient, MasterState};
    use crate::agent::pool::SubmitOutcome;
    use crate::agent::protocol::{
        FinishExtras, FinishTaskRequest, MasterResult, ReportRequest, StatusCode, TaskStatus,
    };
    use crate::agent::scheduler::{select_task_index, Band};
    use crate::agent::service::{AgentCollaborators, AgentService};
    use crate::agent::types::{
        AgentTaskRequest, BackendIdentity, Priority, TaskKind, TaskPayload,
    };
    use crate::config::AgentConfig;
    use crate::engine::memory::{LoaderOp, MemoryEngine};
    use crate::engine::types::{
        AlterKind, AlterTabletReq, CheckConsistencyReq, CloneReq, CreateTabletReq, DropTabletReq,
        MoveDirReq, PartitionVersionInfo, PublishVersionReq, PushReq, PushType, SnapshotReq,
        StorageMedium,
    };
    use crate::engine::StorageEngine;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio::sync::Mutex;

    /// Coordinator stand-in: records every message, fails finish calls on
    /// request.
    #[derive(Default)]
    struct RecordingMaster {
        finishes: Mutex<Vec<FinishTaskRequest>>,
        reports: Mutex<Vec<ReportRequest>>,
        /// Remaining finish calls to fail; `u32::MAX` fails forever.
        fail_finish: AtomicU32,
    }

    #[async_trait]
    impl MasterClient for RecordingMaster {
        async fn finish_task(&self, request: &FinishTaskRequest) -> Result<MasterResult> {
            let remaining = self.fail_finish.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != u32::MAX {
                    self.fail_finish.fetch_sub(1, Ordering::SeqCst);
                }
                anyhow::bail!("coordinator unreachable");
            }
            self.finishes.lock().await.push(request.clone());
            Ok(MasterResult {
                status: TaskStatus::ok(),
            })
        }

        async fn report(&self, request: &ReportRequest) -> Result<MasterResult> {
            self.reports.lock().await.push(request.clone());
            Ok(MasterResult {
                status: TaskStatus::ok(),
            })
        }
    }

    impl RecordingMaster {
        async fn finishes_for(&self, signature: i64) -> Vec<FinishTaskRequest> {
            self.finishes
                .lock()
                .await
                .iter()
                .filter(|finish| finish.signature == signature)
                .cloned()
                .collect()
        }
    }

    struct Harness {
        agent: Arc<AgentService>,
        engine: Arc<MemoryEngine>,
        master: Arc<RecordingMaster>,
    }

    fn backend() -> BackendIdentity {
        BackendIdentity {
            host: "127.0.0.1".to_string(),
            be_port: 9060,
            http_port: 10060,
        }
    }

    fn build_harness(config: AgentConfig, master_known: bool) -> Harness {
        let engine = Arc::new(MemoryEngine::new(vec!["/data/be".to_string()]));
        let master = Arc::new(RecordingMaster::default());
        let master_state = Arc::new(MasterState::new());
        if master_known {
            master_state.set_addr("127.0.0.1:9020".to_string());
        }
        let collaborators = AgentCollaborators {
            engine: engine.clone(),
            tablets: engine.clone(),
            snapshots: engine.clone(),
            loader: engine.clone(),
        };
        let agent = AgentService::new(
            config,
            backend(),
            master.clone(),
            master_state,
            collaborators,
        );
        Harness {
            agent,
            engine,
            master,
        }
    }

    fn create_req(tablet_id: i64) -> CreateTabletReq {
        CreateTabletReq {
            tablet_id,
            schema_hash: 111,
            partition_id: 7,
            version: 1,
            version_hash: 1111,
            storage_medium: StorageMedium::Hdd,
        }
    }

    fn push_task(
        signature: i64,
        tablet_id: i64,
        user: Option<&str>,
        priority: Option<Priority>,
        push_type: PushType,
    ) -> AgentTaskRequest {
        AgentTaskRequest {
            kind: TaskKind::Push,
            signature,
            user: user.map(str::to_string),
            priority,
            payload: TaskPayload::Push(PushReq {
                tablet_id,
                schema_hash: 111,
                version: 2,
                version_hash: 2222,
                push_type,
                http_file_path: None,
            }),
        }
    }

    fn task(kind: TaskKind, signature: i64, payload: TaskPayload) -> AgentTaskRequest {
        AgentTaskRequest {
            kind,
            signature,
            user: None,
            priority: None,
            payload,
        }
    }

    async fn wait_for<F, Fut>(what: &str, condition: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..2000 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    // ============================================================
    // TEST 1: Ledger - dedup, kind isolation, release
    // ============================================================

    #[test]
    fn test_ledger_dedup_and_kind_isolation() {
        let ledger = TaskLedger::new();

        assert!(ledger.try_record(TaskKind::Push, 42, "alice"));
        assert!(!ledger.try_record(TaskKind::Push, 42, "alice"));
        // Kinds never collide on the same numeric signature.
        assert!(ledger.try_record(TaskKind::Clone, 42, ""));

        assert!(ledger.is_pending(TaskKind::Push, 42));
        assert_eq!(ledger.pending_count(TaskKind::Push), 1);

        ledger.remove(TaskKind::Push, 42, "alice");
        assert!(!ledger.is_pending(TaskKind::Push, 42));
        // The signature is free for reuse after removal.
        assert!(ledger.try_record(TaskKind::Push, 42, "alice"));
    }

    #[test]
    fn test_ledger_push_accounting_clamps_at_zero() {
        let ledger = TaskLedger::new();

        assert!(ledger.try_record(TaskKind::Push, 1, "alice"));
        assert_eq!(ledger.accepted_counts(TaskKind::Push, "alice"), (1, 1));
        ledger.note_running(TaskKind::Push, "alice");
        assert_eq!(ledger.running_count(TaskKind::Push, "alice"), 1);

        ledger.remove(TaskKind::Push, 1, "alice");
        assert_eq!(ledger.accepted_counts(TaskKind::Push, "alice"), (0, 0));
        assert_eq!(ledger.running_count(TaskKind::Push, "alice"), 0);

        // A spurious remove must not underflow the counters.
        ledger.remove(TaskKind::Push, 1, "alice");
        assert_eq!(ledger.accepted_counts(TaskKind::Push, "alice"), (0, 0));
        assert_eq!(ledger.running_count(TaskKind::Push, "alice"), 0);

        // Only push carries accounting.
        assert!(ledger.try_record(TaskKind::Clone, 9, "alice"));
        assert_eq!(ledger.accepted_counts(TaskKind::Clone, "alice"), (0, 0));
        ledger.note_running(TaskKind::Clone, "alice");
        assert_eq!(ledger.running_count(TaskKind::Clone, "alice"), 0);
    }

    // ============================================================
    // TEST 2: Report version - seed and monotonic bump
    // ============================================================

    #[test]
    fn test_report_version_seed_and_bump() {
        let seed_floor = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            * 10_000;

        let version = ReportVersion::new();
        assert!(version.current() >= seed_floor);

        let bumped = version.bump();
        assert_eq!(bumped, version.current());
        assert_eq!(version.bump(), bumped + 1);
    }

    // ============================================================
    // TEST 3: Scheduler - bands and fair shares
    // ============================================================

    #[test]
    fn test_scheduler_high_band_picks_first_high_task() {
        let ledger = TaskLedger::new();
        let mut queue: VecDeque<AgentTaskRequest> = VecDeque::new();
        for signature in 0..5 {
            queue.push_back(push_task(signature, 1, None, None, PushType::Load));
        }
        queue.push_back(push_task(
            99,
            1,
            None,
            Some(Priority::High),
            PushType::Load,
        ));

        // HIGH takes the flagged task regardless of position; NORMAL stays FIFO.
        assert_eq!(select_task_index(&queue, Band::High, &ledger, 2), Some(5));
        assert_eq!(select_task_index(&queue, Band::Normal, &ledger, 2), Some(0));

        // Without high-priority work the HIGH band selects nothing.
        let normal_only: VecDeque<AgentTaskRequest> =
            (0..5).map(|s| push_task(s, 1, None, None, PushType::Load)).collect();
        assert_eq!(select_task_index(&normal_only, Band::High, &ledger, 2), None);
    }

    #[test]
    fn test_scheduler_skips_saturated_tenant() {
        let ledger = TaskLedger::new();
        // Accepted totals: alice 90, bob 10.
        for signature in 0..90 {
            assert!(ledger.try_record(TaskKind::Push, signature, "alice"));
        }
        for signature in 90..100 {
            assert!(ledger.try_record(TaskKind::Push, signature, "bob"));
        }
        // alice already occupies 3 of 4 slots.
        for _ in 0..3 {
            ledger.note_running(TaskKind::Push, "alice");
        }

        let mut queue: VecDeque<AgentTaskRequest> = VecDeque::new();
        queue.push_back(push_task(0, 1, Some("alice"), None, PushType::Load));
        queue.push_back(push_task(90, 1, Some("bob"), None, PushType::Load));

        // alice projects 4/4 = 1.0 > 0.9 and is skipped; bob has nothing
        // running and bootstraps in.
        assert_eq!(select_task_index(&queue, Band::Normal, &ledger, 4), Some(1));

        // With only alice queued nothing qualifies; the caller falls back to
        // the queue head.
        let alice_only: VecDeque<AgentTaskRequest> =
            vec![push_task(0, 1, Some("alice"), None, PushType::Load)]
                .into_iter()
                .collect();
        assert_eq!(select_task_index(&alice_only, Band::Normal, &ledger, 4), None);
    }

    #[test]
    fn test_scheduler_never_selects_from_empty_queue() {
        let ledger = TaskLedger::new();
        let queue: VecDeque<AgentTaskRequest> = VecDeque::new();
        assert_eq!(select_task_index(&queue, Band::High, &ledger, 2), None);
        assert_eq!(select_task_index(&queue, Band::Normal, &ledger, 2), None);
    }

    // ============================================================
    // TEST 4: Submission - dedup before pickup (S1)
    // ============================================================

    #[tokio::test]
    async fn test_duplicate_submission_is_not_enqueued() {
        // Pools are built but never started, so nothing drains the queue.
        let harness = build_harness(AgentConfig::default(), true);
        let pool = harness.agent.pool(TaskKind::Push).unwrap();

        let task = push_task(42, 1, Some("alice"), None, PushType::Load);
        assert_eq!(pool.submit(task.clone()).await, SubmitOutcome::Accepted);
        assert_eq!(pool.submit(task).await, SubmitOutcome::Duplicate);

        assert_eq!(pool.queue_len().await, 1);
        let stats = harness.agent.stats();
        assert_eq!(stats.metrics.tasks_submitted, 1);
        assert_eq!(stats.metrics.tasks_duplicated, 1);
    }

    // ============================================================
    // TEST 5: Round trip - completion frees the signature, replay
    // is absorbed without a second finish (S1 tail + S7)
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_signature_freed_and_replay_absorbed() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.agent.start();

        let task = push_task(42, 1, Some("alice"), None, PushType::Load);
        assert_eq!(
            harness.agent.submit(task.clone()).await.unwrap(),
            SubmitOutcome::Accepted
        );
        wait_for("first push to finish", || async {
            harness.master.finishes_for(42).await.len() == 1
                && !harness.agent.shared().ledger.is_pending(TaskKind::Push, 42)
        })
        .await;

        // The signature is free again, so the resubmission is accepted; the
        // engine recognizes the replay and nothing reaches the coordinator.
        assert_eq!(
            harness.agent.submit(task).await.unwrap(),
            SubmitOutcome::Accepted
        );
        wait_for("replay to clear the ledger", || async {
            !harness.agent.shared().ledger.is_pending(TaskKind::Push, 42)
        })
        .await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let finishes = harness.master.finishes_for(42).await;
        assert_eq!(finishes.len(), 1, "replay must not produce a second finish");
        assert!(finishes[0].task_status.is_ok());
        assert_eq!(
            harness
                .agent
                .shared()
                .ledger
                .running_count(TaskKind::Push, "alice"),
            0
        );
    }

    // ============================================================
    // TEST 6: High-priority preemption across the band split (S2)
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_high_band_worker_takes_high_task_first() {
        let config = AgentConfig {
            push_worker_count_normal_priority: 1,
            push_worker_count_high_priority: 1,
            ..AgentConfig::default()
        };
        let harness = build_harness(config, true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();

        // Queue five NORMAL tasks, then one HIGH, before any worker runs.
        for signature in 1..=5 {
            harness
                .agent
                .submit(push_task(signature, 1, Some("alice"), None, PushType::Load))
                .await
                .unwrap();
        }
        harness
            .agent
            .submit(push_task(
                6,
                1,
                Some("alice"),
                Some(Priority::High),
                PushType::Load,
            ))
            .await
            .unwrap();

        harness.agent.start();
        wait_for("all six pushes to finish", || async {
            harness.master.finishes.lock().await.len() == 6
        })
        .await;

        // The HIGH worker's first pick is the HIGH task, so it lands within
        // the first two completions despite sitting at the queue tail.
        let finishes = harness.master.finishes.lock().await;
        let high_position = finishes
            .iter()
            .position(|finish| finish.signature == 6)
            .expect("high task finished");
        assert!(
            high_position < 2,
            "high-priority task finished at position {high_position}"
        );
    }

    // ============================================================
    // TEST 7: Publish version - internal retry then success (S4)
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_publish_version_retries_then_succeeds() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.engine.set_publish_failures(2);
        harness.agent.start();

        let version_before = harness.agent.stats().report_version;
        let started_at = tokio::time::Instant::now();
        harness
            .agent
            .submit(task(
                TaskKind::PublishVersion,
                10,
                TaskPayload::PublishVersion(PublishVersionReq {
                    transaction_id: 55,
                    partition_version_infos: vec![PartitionVersionInfo {
                        partition_id: 7,
                        version: 9,
                        version_hash: 9999,
                    }],
                }),
            ))
            .await
            .unwrap();

        wait_for("publish to finish", || async {
            harness.master.finishes_for(10).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(10).await.remove(0);
        assert!(finish.task_status.is_ok());
        // Publishing never advances or stamps the report version.
        assert_eq!(finish.report_version, None);
        assert_eq!(harness.agent.stats().report_version, version_before);
        assert!(started_at.elapsed() >= Duration::from_secs(2));
        assert_eq!(harness.engine.tablet_version(1, 111), Some(9));
    }

    // ============================================================
    // TEST 8: Publish version - exhaustion surfaces error tablets
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_publish_version_exhaustion_reports_error_tablets() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.engine.set_publish_failures(u32::MAX);
        harness.agent.start();

        harness
            .agent
            .submit(task(
                TaskKind::PublishVersion,
                11,
                TaskPayload::PublishVersion(PublishVersionReq {
                    transaction_id: 56,
                    partition_version_infos: vec![PartitionVersionInfo {
                        partition_id: 7,
                        version: 9,
                        version_hash: 9999,
                    }],
                }),
            ))
            .await
            .unwrap();

        wait_for("publish to give up", || async {
            harness.master.finishes_for(11).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(11).await.remove(0);
        assert_eq!(finish.task_status.status_code, StatusCode::RuntimeError);
        assert_eq!(finish.extras.error_tablet_ids, Some(vec![1]));
    }

    // ============================================================
    // TEST 9: Finish RPC down - bounded retry then give up (S5)
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_finish_task_gives_up_after_three_attempts() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.master.fail_finish.store(u32::MAX, Ordering::SeqCst);
        harness.agent.start();

        harness
            .agent
            .submit(task(
                TaskKind::CreateTablet,
                77,
                TaskPayload::CreateTablet(create_req(5)),
            ))
            .await
            .unwrap();

        wait_for("ledger slot release", || async {
            !harness
                .agent
                .shared()
                .ledger
                .is_pending(TaskKind::CreateTablet, 77)
        })
        .await;

        let stats = harness.agent.stats();
        assert_eq!(stats.metrics.finish_task_requests_total, 3);
        assert_eq!(stats.metrics.finish_task_requests_failed, 3);
        assert!(harness.master.finishes_for(77).await.is_empty());

        // The task must not reappear.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!harness
            .agent
            .shared()
            .ledger
            .is_pending(TaskKind::CreateTablet, 77));
        assert_eq!(
            harness.agent.stats().metrics.finish_task_requests_total,
            3
        );
    }

    // ============================================================
    // TEST 10: Drop - not-found maps to OK (S6)
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_drop_missing_tablet_reports_ok() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.agent.start();

        harness
            .agent
            .submit(task(
                TaskKind::DropTablet,
                21,
                TaskPayload::DropTablet(DropTabletReq {
                    tablet_id: 404,
                    schema_hash: 111,
                }),
            ))
            .await
            .unwrap();

        wait_for("drop to finish", || async {
            harness.master.finishes_for(21).await.len() == 1
        })
        .await;
        assert!(harness.master.finishes_for(21).await[0].task_status.is_ok());
    }

    // ============================================================
    // TEST 11: Create - report version advances on success only
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_create_tablet_advances_report_version_on_success() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.agent.start();
        let version_before = harness.agent.stats().report_version;

        harness
            .agent
            .submit(task(
                TaskKind::CreateTablet,
                30,
                TaskPayload::CreateTablet(create_req(8)),
            ))
            .await
            .unwrap();
        wait_for("create to finish", || async {
            harness.master.finishes_for(30).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(30).await.remove(0);
        assert!(finish.task_status.is_ok());
        assert_eq!(finish.report_version, Some(version_before + 1));

        // A failed create (duplicate tablet) stamps but does not advance.
        harness
            .agent
            .submit(task(
                TaskKind::CreateTablet,
                31,
                TaskPayload::CreateTablet(create_req(8)),
            ))
            .await
            .unwrap();
        wait_for("second create to finish", || async {
            harness.master.finishes_for(31).await.len() == 1
        })
        .await;

        let failed = harness.master.finishes_for(31).await.remove(0);
        assert_eq!(failed.task_status.status_code, StatusCode::RuntimeError);
        assert_eq!(failed.report_version, Some(version_before + 1));
        assert_eq!(harness.agent.stats().report_version, version_before + 1);
    }

    // ============================================================
    // TEST 12: Alter - sub-kind dispatch and new tablet info
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_alter_tablet_attaches_new_tablet_info() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.agent.start();
        let version_before = harness.agent.stats().report_version;

        let mut new_tablet = create_req(2);
        new_tablet.version = 3;
        harness
            .agent
            .submit(task(
                TaskKind::AlterTablet,
                40,
                TaskPayload::AlterTablet(AlterTabletReq {
                    base_tablet_id: 1,
                    base_schema_hash: 111,
                    alter_kind: AlterKind::SchemaChange,
                    new_tablet_req: new_tablet,
                }),
            ))
            .await
            .unwrap();

        wait_for("alter to finish", || async {
            harness.master.finishes_for(40).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(40).await.remove(0);
        assert!(finish.task_status.is_ok());
        assert_eq!(finish.report_version, Some(version_before + 1));
        let infos = finish.extras.finish_tablet_infos.expect("tablet infos");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].tablet_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alter_unknown_sub_kind_is_analysis_error() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.agent.start();
        let tablets_before = harness.engine.tablet_count();

        harness
            .agent
            .submit(task(
                TaskKind::AlterTablet,
                41,
                TaskPayload::AlterTablet(AlterTabletReq {
                    base_tablet_id: 1,
                    base_schema_hash: 111,
                    alter_kind: AlterKind::Unknown,
                    new_tablet_req: create_req(3),
                }),
            ))
            .await
            .unwrap();

        wait_for("alter to finish", || async {
            harness.master.finishes_for(41).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(41).await.remove(0);
        assert_eq!(finish.task_status.status_code, StatusCode::AnalysisError);
        // The engine is never invoked for an invalid sub-kind.
        assert_eq!(harness.engine.tablet_count(), tablets_before);
    }

    #[test]
    fn test_unknown_alter_sub_kind_survives_deserialization() {
        let parsed: AlterKind = serde_json::from_str("\"AddGeneratedColumn\"").unwrap();
        assert_eq!(parsed, AlterKind::Unknown);
        let known: AlterKind = serde_json::from_str("\"Rollup\"").unwrap();
        assert_eq!(known, AlterKind::Rollup);
    }

    // ============================================================
    // TEST 13: Push delete sub-mode echoes the request version
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_delete_push_echoes_request_version() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.agent.start();

        harness
            .agent
            .submit(push_task(50, 1, Some("alice"), None, PushType::Delete))
            .await
            .unwrap();
        wait_for("delete push to finish", || async {
            harness.master.finishes_for(50).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(50).await.remove(0);
        assert!(finish.task_status.is_ok());
        assert_eq!(finish.extras.request_version, Some(2));
        assert_eq!(finish.extras.request_version_hash, Some(2222));
    }

    // ============================================================
    // TEST 14: Check consistency carries checksum and version echo
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_check_consistency_attaches_checksum() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.agent.start();

        harness
            .agent
            .submit(task(
                TaskKind::CheckConsistency,
                60,
                TaskPayload::CheckConsistency(CheckConsistencyReq {
                    tablet_id: 1,
                    schema_hash: 111,
                    version: 1,
                    version_hash: 1111,
                }),
            ))
            .await
            .unwrap();
        wait_for("check to finish", || async {
            harness.master.finishes_for(60).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(60).await.remove(0);
        assert!(finish.task_status.is_ok());
        assert!(finish.extras.tablet_checksum.is_some());
        assert_eq!(finish.extras.request_version, Some(1));
        assert_eq!(finish.extras.request_version_hash, Some(1111));
    }

    // ============================================================
    // TEST 15: Move dir - forced overwrite and missing tablet
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_move_dir_forces_overwrite() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.agent.start();

        harness
            .agent
            .submit(task(
                TaskKind::MoveDir,
                70,
                TaskPayload::MoveDir(MoveDirReq {
                    tablet_id: 1,
                    schema_hash: 111,
                    src: "/staging/job_9/1".to_string(),
                    job_id: 9,
                }),
            ))
            .await
            .unwrap();
        wait_for("move to finish", || async {
            harness.master.finishes_for(70).await.len() == 1
        })
        .await;

        assert!(harness.master.finishes_for(70).await[0].task_status.is_ok());
        let moved = harness
            .engine
            .loader_ops()
            .into_iter()
            .find(|op| matches!(op, LoaderOp::Move { .. }))
            .expect("move recorded");
        match moved {
            LoaderOp::Move {
                job_id, overwrite, ..
            } => {
                assert_eq!(job_id, 9);
                assert!(overwrite);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_dir_missing_tablet_is_analysis_error() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.agent.start();

        harness
            .agent
            .submit(task(
                TaskKind::MoveDir,
                71,
                TaskPayload::MoveDir(MoveDirReq {
                    tablet_id: 404,
                    schema_hash: 111,
                    src: "/staging/job_9/404".to_string(),
                    job_id: 9,
                }),
            ))
            .await
            .unwrap();
        wait_for("move to finish", || async {
            harness.master.finishes_for(71).await.len() == 1
        })
        .await;

        assert_eq!(
            harness.master.finishes_for(71).await[0]
                .task_status
                .status_code,
            StatusCode::AnalysisError
        );
        assert!(harness.engine.loader_ops().is_empty());
    }

    // ============================================================
    // TEST 16: Make snapshot - path and file listing attached
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_make_snapshot_lists_files() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.agent.start();

        harness
            .agent
            .submit(task(
                TaskKind::MakeSnapshot,
                80,
                TaskPayload::MakeSnapshot(SnapshotReq {
                    tablet_id: 1,
                    schema_hash: 111,
                    version: 1,
                    version_hash: 1111,
                    list_files: true,
                }),
            ))
            .await
            .unwrap();
        wait_for("snapshot to finish", || async {
            harness.master.finishes_for(80).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(80).await.remove(0);
        assert!(finish.task_status.is_ok());
        let snapshot_path = finish.extras.snapshot_path.expect("snapshot path");
        assert!(snapshot_path.contains("/snapshot/"));
        let files = finish.extras.snapshot_files.expect("snapshot files");
        assert!(!files.is_empty());
    }

    // ============================================================
    // TEST 17: Clone - success counts and tablet infos
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_clone_attaches_tablet_infos_and_counts() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.agent.start();

        harness
            .agent
            .submit(task(
                TaskKind::Clone,
                90,
                TaskPayload::Clone(CloneReq {
                    tablet_id: 12,
                    schema_hash: 111,
                    partition_id: 7,
                    version: 4,
                    version_hash: 4444,
                    src_backends: vec!["127.0.0.2:9060".to_string()],
                    storage_medium: StorageMedium::Hdd,
                }),
            ))
            .await
            .unwrap();
        wait_for("clone to finish", || async {
            harness.master.finishes_for(90).await.len() == 1
        })
        .await;

        let finish = harness.master.finishes_for(90).await.remove(0);
        assert!(finish.task_status.is_ok());
        let infos = finish.extras.finish_tablet_infos.expect("tablet infos");
        assert_eq!(infos[0].tablet_id, 12);
        assert_eq!(harness.agent.stats().metrics.clone_requests_total, 1);
        assert_eq!(harness.agent.stats().metrics.clone_requests_failed, 0);
    }

    // ============================================================
    // TEST 18: Reporters - heartbeat gating and wakeup channels
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_reports_wait_for_coordinator_heartbeat() {
        let harness = build_harness(AgentConfig::default(), false);
        harness.agent.start();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(harness.master.reports.lock().await.is_empty());

        harness
            .agent
            .master_state()
            .set_addr("127.0.0.1:9020".to_string());
        wait_for("task report after heartbeat", || async {
            harness
                .master
                .reports
                .lock()
                .await
                .iter()
                .any(|report| report.tasks.is_some())
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_report_carries_pending_signatures() {
        let harness = build_harness(AgentConfig::default(), true);
        // An unstarted pool keeps the task pending forever.
        let pool = harness.agent.pool(TaskKind::Clone).unwrap();
        pool.submit(task(
            TaskKind::Clone,
            123,
            TaskPayload::Clone(CloneReq {
                tablet_id: 1,
                schema_hash: 111,
                partition_id: 7,
                version: 1,
                version_hash: 1111,
                src_backends: vec![],
                storage_medium: StorageMedium::Hdd,
            }),
        ))
        .await;

        tokio::spawn(crate::agent::reporter::run_task_reporter(
            harness.agent.shared().clone(),
        ));
        wait_for("task report with the pending signature", || async {
            harness.master.reports.lock().await.iter().any(|report| {
                report
                    .tasks
                    .as_ref()
                    .and_then(|tasks| tasks.get(&TaskKind::Clone))
                    .map(|signatures| signatures.contains(&123))
                    .unwrap_or(false)
            })
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disk_report_content_and_wakeup() {
        let harness = build_harness(AgentConfig::default(), true);
        tokio::spawn(crate::agent::reporter::run_disk_reporter(
            harness.agent.shared().clone(),
            harness.engine.clone(),
        ));

        wait_for("first disk report", || async {
            harness
                .master
                .reports
                .lock()
                .await
                .iter()
                .any(|report| report.disks.is_some())
        })
        .await;
        let count_before = harness.master.reports.lock().await.len();

        // A disk-change signal cuts the bounded wait short.
        harness.engine.notify_disk_change();
        wait_for("disk report after notify", || async {
            harness.master.reports.lock().await.len() > count_before
        })
        .await;

        let reports = harness.master.reports.lock().await;
        let disks = reports
            .iter()
            .find_map(|report| report.disks.as_ref())
            .unwrap();
        let disk = disks.get("/data/be").expect("configured data root");
        assert!(disk.used);
        assert_eq!(disk.root_path, "/data/be");
        assert_ne!(disk.path_hash, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tablet_report_skips_round_on_engine_error() {
        let harness = build_harness(AgentConfig::default(), true);
        harness.engine.create_tablet(&create_req(1)).await.unwrap();
        harness.engine.set_tablet_report_error(true);
        tokio::spawn(crate::agent::reporter::run_tablet_reporter(
            harness.agent.shared().clone(),
            harness.engine.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(harness
            .master
            .reports
            .lock()
            .await
            .iter()
            .all(|report| report.tablets.is_none()));

        harness.engine.set_tablet_report_error(false);
        wait_for("tablet report after recovery", || async {
            harness
                .master
                .reports
                .lock()
                .await
                .iter()
                .any(|report| report.tablets.is_some())
        })
        .await;

        let reports = harness.master.reports.lock().await;
        let report = reports
            .iter()
            .find(|report| report.tablets.is_some())
            .unwrap();
        assert!(report.report_version.is_some());
        assert_eq!(report.tablets.as_ref().unwrap().len(), 1);
    }

    // ============================================================
    // TEST 19: Wire shapes
    // ============================================================

    #[test]
    fn test_finish_request_omits_unset_fields() {
        let finish = FinishTaskRequest {
            backend: backend(),
            task_kind: TaskKind::DropTablet,
            signature: 5,
            task_status: TaskStatus::ok(),
            report_version: None,
            extras: FinishExtras::default(),
        };
        let value = serde_json::to_value(&finish).unwrap();
        assert!(value.get("report_version").is_none());
        assert!(value.get("finish_tablet_infos").is_none());
        assert!(value.get("snapshot_path").is_none());

        let with_extras = FinishTaskRequest {
            extras: FinishExtras {
                snapshot_path: Some("/data/be/snapshot/x".to_string()),
                ..FinishExtras::default()
            },
            ..finish
        };
        let value = serde_json::to_value(&with_extras).unwrap();
        assert_eq!(value["snapshot_path"], "/data/be/snapshot/x");
    }

    #[test]
    fn test_report_request_task_map_serializes() {
        let mut report = ReportRequest::new(backend(), false);
        let mut tasks = std::collections::BTreeMap::new();
        tasks.insert(TaskKind::Push, [42i64].into_iter().collect());
        report.tasks = Some(tasks);

        let encoded = serde_json::to_string(&report).unwrap();
        assert!(encoded.contains("\"Push\""));
        let decoded: ReportRequest = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.tasks.unwrap()[&TaskKind::Push].contains(&42));
    }
}
