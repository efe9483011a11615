//! Agent task worker subsystem.
//!
//! The coordinator hands this node directives — create tablet, push a data
//! batch, publish a version, snapshot, clone, migrate — and expects each to
//! be executed exactly once and answered with a finish message. This module
//! is the machinery between those two points.
//!
//! ## Architecture Overview
//! 1. **Submission**: the coordinator posts a task; the process-wide
//!    [`ledger`] deduplicates by (kind, signature) before the task reaches
//!    its pool's queue.
//! 2. **Execution**: each kind owns a fixed-size [`pool`] of detached
//!    workers draining the queue FIFO; the push-style pools pick work via
//!    the [`scheduler`]'s priority bands and per-tenant fair shares.
//! 3. **Completion**: the worker invokes its kind's [`workers`] handler
//!    against the storage contracts, reports the result through [`master`]
//!    with bounded retries, and releases the ledger slot.
//! 4. **Reporting**: three [`reporter`] loops keep the coordinator's view
//!    of in-flight tasks, disks, and tablets fresh, woken early by the
//!    storage engine when state changes.
//!
//! ## Submodules
//! - **`types`**: task kinds, request envelope, payload variants.
//! - **`protocol`**: wire shapes for submit/finish/report plus endpoints.
//! - **`ledger`**: signature dedup and push accounting; report version.
//! - **`scheduler`**: next-task selection for push pools.
//! - **`pool`**: queue + worker loops; `workers`: per-kind handlers.
//! - **`master`**: coordinator client; `reporter`: periodic reports.
//! - **`service`**: construction and wiring; `handlers`: HTTP surface.

pub mod handlers;
pub mod ledger;
pub mod master;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod reporter;
pub mod scheduler;
pub mod service;
pub mod types;
pub mod workers;

#[cfg(test)]
mod tests;
