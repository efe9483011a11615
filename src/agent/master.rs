//! Outbound RPC to the coordinator.
//!
//! The coordinator address is not known at startup; it arrives through the
//! heartbeat endpoint and lands in `MasterState`. Until then every send
//! fails fast and the callers (finish retry loop, reporters) back off.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;

use super::metrics::AgentMetrics;
use super::protocol::{
    FinishTaskRequest, MasterResult, ReportRequest, ENDPOINT_FINISH_TASK, ENDPOINT_REPORT,
};

pub const TASK_FINISH_MAX_RETRY: u32 = 3;

/// Coordinator address cell, filled in by the first heartbeat.
#[derive(Debug, Default)]
pub struct MasterState {
    addr: RwLock<Option<String>>,
}

impl MasterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_addr(&self, addr: String) {
        let mut slot = self.addr.write().expect("master addr lock");
        if slot.as_deref() != Some(addr.as_str()) {
            tracing::info!(master_addr = %addr, "coordinator address updated");
        }
        *slot = Some(addr);
    }

    pub fn addr(&self) -> Option<String> {
        self.addr.read().expect("master addr lock").clone()
    }

    pub fn is_known(&self) -> bool {
        self.addr.read().expect("master addr lock").is_some()
    }
}

#[async_trait]
pub trait MasterClient: Send + Sync {
    async fn finish_task(&self, request: &FinishTaskRequest) -> Result<MasterResult>;

    async fn report(&self, request: &ReportRequest) -> Result<MasterResult>;
}

pub struct HttpMasterClient {
    http_client: reqwest::Client,
    state: std::sync::Arc<MasterState>,
}

impl HttpMasterClient {
    pub fn new(state: std::sync::Arc<MasterState>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            state,
        }
    }

    async fn post<T: serde::Serialize>(&self, endpoint: &str, payload: &T) -> Result<MasterResult> {
        let Some(base) = self.state.addr() else {
            bail!("coordinator address not yet known");
        };
        let response = self
            .http_client
            .post(format!("http://{base}{endpoint}"))
            .json(payload)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .with_context(|| format!("POST {endpoint} to coordinator {base}"))?;
        if !response.status().is_success() {
            bail!("coordinator rejected {}: {}", endpoint, response.status());
        }
        response
            .json::<MasterResult>()
            .await
            .context("decoding coordinator result")
    }
}

#[async_trait]
impl MasterClient for HttpMasterClient {
    async fn finish_task(&self, request: &FinishTaskRequest) -> Result<MasterResult> {
        self.post(ENDPOINT_FINISH_TASK, request).await
    }

    async fn report(&self, request: &ReportRequest) -> Result<MasterResult> {
        self.post(ENDPOINT_REPORT, request).await
    }
}

/// Hand a finish message to the coordinator, trying up to
/// [`TASK_FINISH_MAX_RETRY`] times with a fixed sleep between failures.
/// An RPC-level success counts regardless of the embedded status code.
/// After the last failure the message is abandoned; the periodic task
/// report lets the coordinator reconcile.
pub async fn finish_task_with_retry(
    client: &dyn MasterClient,
    metrics: &AgentMetrics,
    request: &FinishTaskRequest,
    retry_sleep: Duration,
) {
    use std::sync::atomic::Ordering;

    for _ in 0..TASK_FINISH_MAX_RETRY {
        metrics
            .finish_task_requests_total
            .fetch_add(1, Ordering::Relaxed);
        match client.finish_task(request).await {
            Ok(result) => {
                tracing::info!(
                    signature = request.signature,
                    kind = ?request.task_kind,
                    result_code = ?result.status.status_code,
                    "finish task reported"
                );
                return;
            }
            Err(error) => {
                metrics
                    .finish_task_requests_failed
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    signature = request.signature,
                    kind = ?request.task_kind,
                    error = %error,
                    "finish task report failed"
                );
            }
        }
        tokio::time::sleep(retry_sleep).await;
    }
}
