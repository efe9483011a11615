//! HTTP endpoints exposed by the agent.
//!
//! The coordinator submits tasks and pushes its own address through these
//! handlers; `stats` exists for operators. Submission acknowledges without
//! waiting for execution, and a duplicate signature is a positive
//! acknowledgement, not an error.

use axum::{http::StatusCode, Extension, Json};
use std::sync::Arc;

use super::pool::SubmitOutcome;
use super::protocol::{
    AgentStatsResponse, HeartbeatRequest, SubmitTaskRequest, SubmitTaskResponse,
};
use super::service::AgentService;

pub async fn handle_submit_task(
    Extension(agent): Extension<Arc<AgentService>>,
    Json(req): Json<SubmitTaskRequest>,
) -> (StatusCode, Json<Option<SubmitTaskResponse>>) {
    let signature = req.task.signature;
    match agent.submit(req.task).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(Some(SubmitTaskResponse {
                signature,
                duplicate: outcome == SubmitOutcome::Duplicate,
            })),
        ),
        Err(error) => {
            tracing::warn!(signature, %error, "rejected task submission");
            (StatusCode::BAD_REQUEST, Json(None))
        }
    }
}

pub async fn handle_heartbeat(
    Extension(agent): Extension<Arc<AgentService>>,
    Json(req): Json<HeartbeatRequest>,
) -> StatusCode {
    agent.master_state().set_addr(req.master_addr);
    StatusCode::OK
}

pub async fn handle_agent_stats(
    Extension(agent): Extension<Arc<AgentService>>,
) -> Json<AgentStatsResponse> {
    Json(agent.stats())
}
