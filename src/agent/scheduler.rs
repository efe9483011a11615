//! Next-task selection for the push-style pools.
//!
//! Push workers are partitioned into two bands. A HIGH worker only ever
//! takes requests flagged high priority; a NORMAL worker walks the queue
//! looking for the first tenant whose projected share of running slots does
//! not exceed that tenant's share of accepted work. A tenant with nothing
//! running always qualifies, which bootstraps new tenants without history.
//! This approximates weighted fair queuing without keeping any history
//! beyond the two counters.

use std::collections::{HashSet, VecDeque};

use super::ledger::TaskLedger;
use super::types::AgentTaskRequest;

/// Which partition of the push worker set a worker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Normal,
    High,
}

/// Pick the queue index the calling worker should take, or `None`.
///
/// `None` in the HIGH band means no high-priority work exists; the caller
/// re-signals the queue and backs off. `None` in the NORMAL band means no
/// tenant qualified; the caller falls back to the queue head.
pub(crate) fn select_task_index(
    tasks: &VecDeque<AgentTaskRequest>,
    band: Band,
    ledger: &TaskLedger,
    pool_size: u32,
) -> Option<usize> {
    match band {
        Band::High => tasks.iter().position(|task| task.is_high_priority()),
        Band::Normal => {
            let mut improper_users: HashSet<&str> = HashSet::new();
            for (index, task) in tasks.iter().enumerate() {
                let user = task.effective_user();
                if improper_users.contains(user) {
                    continue;
                }
                let running = ledger.running_count(task.kind, user);
                if running == 0 {
                    return Some(index);
                }
                let (user_total, kind_total) = ledger.accepted_counts(task.kind, user);
                // An empty denominator means this kind carries no share
                // accounting at all; everyone qualifies.
                if kind_total == 0 {
                    return Some(index);
                }
                let user_total_rate = user_total as f64 / kind_total as f64;
                let user_running_rate = (running + 1) as f64 / pool_size as f64;
                tracing::debug!(
                    signature = task.signature,
                    user,
                    user_total,
                    kind_total,
                    running,
                    pool_size,
                    user_total_rate,
                    user_running_rate,
                    "evaluating push candidate"
                );
                if user_running_rate <= user_total_rate {
                    return Some(index);
                }
                improper_users.insert(user);
            }
            None
        }
    }
}
