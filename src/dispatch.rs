//! Downstream workflow dispatch.

use crate::ProfileId;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Source agent name stamped on every execution-start payload.
pub const ROUTER_AGENT: &str = "router-agent";

/// The routing decision produced by one pipeline run. Ephemeral —
/// constructed per run and consumed immediately by the dispatch client,
/// never persisted.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub next_agent: String,
    pub message: String,
    pub thread_id: ProfileId,
    pub channel_type: String,
    pub from: String,
}

/// Execution-start payload submitted to the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionInput {
    pub fromagent: String,
    pub nextagent: String,
    pub message: String,
    pub thread_id: String,
    pub channel_type: String,
    pub from: String,
}

impl From<RoutingDecision> for ExecutionInput {
    fn from(decision: RoutingDecision) -> Self {
        Self {
            fromagent: ROUTER_AGENT.to_string(),
            nextagent: decision.next_agent,
            message: decision.message,
            thread_id: decision.thread_id,
            channel_type: decision.channel_type,
            from: decision.from,
        }
    }
}

/// Handle returned by the workflow engine for a started execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: String,
}

/// Capability to trigger exactly one downstream workflow execution per
/// decision. No internal retries — the retry budget belongs to the calling
/// unit, and the engine dedups on execution input.
pub trait WorkflowTrigger: Send + Sync {
    fn start_execution(
        &self,
        input: &ExecutionInput,
    ) -> impl Future<Output = Result<ExecutionHandle>> + Send;
}

/// HTTP client for the workflow engine's execution-start endpoint.
pub struct WorkflowClient {
    http: reqwest::Client,
    endpoint: String,
    workflow_id: String,
}

impl WorkflowClient {
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            workflow_id: config.workflow_id.clone(),
        })
    }
}

impl WorkflowTrigger for WorkflowClient {
    async fn start_execution(&self, input: &ExecutionInput) -> Result<ExecutionHandle> {
        let url = format!(
            "{}/workflows/{}/executions",
            self.endpoint.trim_end_matches('/'),
            self.workflow_id
        );

        let response = self
            .http
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|error| DispatchError::Request(error.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            DispatchError::Request(format!("failed to read response body: {error}"))
        })?;

        if !status.is_success() {
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body: truncate(&body),
            }
            .into());
        }

        let handle: ExecutionHandle = serde_json::from_str(&body).map_err(|error| {
            DispatchError::Request(format!("workflow engine returned invalid JSON: {error}"))
        })?;

        tracing::debug!(
            execution_id = %handle.execution_id,
            nextagent = %input.nextagent,
            thread_id = %input.thread_id,
            "workflow execution started"
        );

        Ok(handle)
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_input_carries_the_exact_wire_fields() {
        let decision = RoutingDecision {
            next_agent: "sales-agent".into(),
            message: "hello".into(),
            thread_id: "p1".into(),
            channel_type: "whatsapp".into(),
            from: "u1".into(),
        };

        let input = ExecutionInput::from(decision);
        let wire = serde_json::to_value(&input).expect("serialize");

        assert_eq!(
            wire,
            serde_json::json!({
                "fromagent": "router-agent",
                "nextagent": "sales-agent",
                "message": "hello",
                "thread_id": "p1",
                "channel_type": "whatsapp",
                "from": "u1",
            })
        );
    }
}
