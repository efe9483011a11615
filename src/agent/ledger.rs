//! Process-wide task accounting.
//!
//! One ledger is shared by every worker pool. It answers three questions:
//! which signatures are currently in flight (dedup), how much push work each
//! tenant has been accepted for (fair-share numerator/denominator), and how
//! many push slots each tenant is occupying right now.
//!
//! Two locks on purpose: the running counters sit behind their own mutex so
//! the push scheduler's critical section stays short. The scheduler reads
//! accepted totals under the main lock and bumps the running counter under
//! the second, so the two snapshots may briefly disagree; fairness is
//! approximate by design of the policy, not exact bookkeeping.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::TaskKind;

#[derive(Debug, Default)]
struct LedgerInner {
    pending: HashMap<TaskKind, HashSet<i64>>,
    total_by_user: HashMap<TaskKind, HashMap<String, u64>>,
    total_by_kind: HashMap<TaskKind, u64>,
}

#[derive(Debug, Default)]
pub struct TaskLedger {
    inner: Mutex<LedgerInner>,
    running_by_user: Mutex<HashMap<TaskKind, HashMap<String, u64>>>,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted submission. Returns `false` when the signature is
    /// already pending for this kind, in which case nothing changes.
    pub fn try_record(&self, kind: TaskKind, signature: i64, user: &str) -> bool {
        let mut inner = self.inner.lock().expect("ledger lock");
        let signatures = inner.pending.entry(kind).or_default();
        if !signatures.insert(signature) {
            tracing::info!(
                ?kind,
                signature,
                queue_size = signatures.len(),
                "task signature already pending, submission ignored"
            );
            return false;
        }
        tracing::info!(
            ?kind,
            signature,
            queue_size = signatures.len(),
            "task signature recorded"
        );
        if kind == TaskKind::Push {
            *inner
                .total_by_user
                .entry(kind)
                .or_default()
                .entry(user.to_string())
                .or_insert(0) += 1;
            *inner.total_by_kind.entry(kind).or_insert(0) += 1;
        }
        true
    }

    /// Release a completed task's slot. Push accounting is wound back with
    /// the signature; counters clamp at zero on a spurious remove.
    pub fn remove(&self, kind: TaskKind, signature: i64, user: &str) {
        let mut inner = self.inner.lock().expect("ledger lock");
        let signatures = inner.pending.entry(kind).or_default();
        signatures.remove(&signature);
        let queue_size = signatures.len();
        if kind == TaskKind::Push {
            if let Some(count) = inner
                .total_by_user
                .entry(kind)
                .or_default()
                .get_mut(user)
            {
                *count = count.saturating_sub(1);
            }
            if let Some(count) = inner.total_by_kind.get_mut(&kind) {
                *count = count.saturating_sub(1);
            }
            drop(inner);
            let mut running = self.running_by_user.lock().expect("running count lock");
            if let Some(count) = running.entry(kind).or_default().get_mut(user) {
                *count = count.saturating_sub(1);
            }
        }
        tracing::info!(?kind, signature, queue_size, "task signature erased");
    }

    /// Accepted totals for the fair-share ratio: (this user, whole kind).
    pub fn accepted_counts(&self, kind: TaskKind, user: &str) -> (u64, u64) {
        let inner = self.inner.lock().expect("ledger lock");
        let by_user = inner
            .total_by_user
            .get(&kind)
            .and_then(|users| users.get(user))
            .copied()
            .unwrap_or(0);
        let by_kind = inner.total_by_kind.get(&kind).copied().unwrap_or(0);
        (by_user, by_kind)
    }

    pub fn running_count(&self, kind: TaskKind, user: &str) -> u64 {
        self.running_by_user
            .lock()
            .expect("running count lock")
            .get(&kind)
            .and_then(|users| users.get(user))
            .copied()
            .unwrap_or(0)
    }

    /// Mark one more running push task for `user`. Only push tasks carry
    /// running accounting.
    pub fn note_running(&self, kind: TaskKind, user: &str) {
        if kind != TaskKind::Push {
            return;
        }
        let mut running = self.running_by_user.lock().expect("running count lock");
        *running
            .entry(kind)
            .or_default()
            .entry(user.to_string())
            .or_insert(0) += 1;
    }

    pub fn is_pending(&self, kind: TaskKind, signature: i64) -> bool {
        self.inner
            .lock()
            .expect("ledger lock")
            .pending
            .get(&kind)
            .map(|signatures| signatures.contains(&signature))
            .unwrap_or(false)
    }

    pub fn pending_count(&self, kind: TaskKind) -> usize {
        self.inner
            .lock()
            .expect("ledger lock")
            .pending
            .get(&kind)
            .map(|signatures| signatures.len())
            .unwrap_or(0)
    }

    /// Full snapshot of in-flight signatures for the task report.
    pub fn pending_snapshot(&self) -> BTreeMap<TaskKind, BTreeSet<i64>> {
        let inner = self.inner.lock().expect("ledger lock");
        inner
            .pending
            .iter()
            .map(|(kind, signatures)| (*kind, signatures.iter().copied().collect()))
            .collect()
    }

    pub fn pending_counts(&self) -> BTreeMap<TaskKind, usize> {
        let inner = self.inner.lock().expect("ledger lock");
        inner
            .pending
            .iter()
            .map(|(kind, signatures)| (*kind, signatures.len()))
            .collect()
    }
}

/// Monotonic stamp telling the coordinator the tablet view has advanced.
///
/// Seeded to wall-clock seconds × 10000 so the counter keeps increasing
/// across process restarts; bumped by one on every successful create, push,
/// or alter.
#[derive(Debug)]
pub struct ReportVersion(AtomicU64);

impl ReportVersion {
    pub fn new() -> Self {
        let epoch_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        Self(AtomicU64::new(epoch_seconds * 10_000))
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for ReportVersion {
    fn default() -> Self {
        Self::new()
    }
}
