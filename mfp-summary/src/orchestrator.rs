//! Orchestrator API client
//!
//! Reads flow runs and their task runs from the workflow orchestrator's
//! REST API. Log rows can reference runs from other workspaces, so a
//! missing flow run is an expected condition, not an error.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use mfp_common::{Error, Result};

/// Task runs are fetched in pages of this size.
const TASK_RUN_PAGE_SIZE: usize = 200;

/// Lifecycle state of a flow or task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    Completed,
    Failed,
    Crashed,
    Cancelled,
    Scheduled,
    Pending,
    Running,
    Paused,
    Cancelling,
    #[serde(other)]
    Unknown,
}

impl StateType {
    /// True once the run can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StateType::Completed | StateType::Failed | StateType::Crashed | StateType::Cancelled
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunState {
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedBy {
    pub display_value: Option<String>,
}

/// One flow run as returned by the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowRun {
    pub id: String,
    pub name: String,
    pub flow_id: String,
    pub deployment_id: Option<String>,
    pub work_queue_name: Option<String>,
    pub flow_version: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Accumulated run time in seconds.
    #[serde(default)]
    pub total_run_time: f64,
    pub infrastructure_document_id: Option<String>,
    pub created_by: Option<CreatedBy>,
    pub state_name: Option<String>,
    pub state: RunState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRun {
    pub state: RunState,
}

/// Counts of task runs by terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskRunStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub crashed: usize,
    pub cancelled: usize,
}

impl TaskRunStats {
    pub fn classify(task_runs: &[TaskRun]) -> Self {
        let mut stats = Self {
            total: task_runs.len(),
            ..Self::default()
        };
        for run in task_runs {
            match run.state.state_type {
                StateType::Completed => stats.completed += 1,
                StateType::Failed => stats.failed += 1,
                StateType::Crashed => stats.crashed += 1,
                StateType::Cancelled => stats.cancelled += 1,
                _ => {}
            }
        }
        stats
    }
}

/// Client for the orchestrator REST API.
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl OrchestratorClient {
    pub fn new(api_url: &str, api_key: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Fetch one flow run. A 404 returns `None`: the id may belong to a
    /// different workspace.
    pub async fn read_flow_run(&self, flow_run_id: &str) -> Result<Option<FlowRun>> {
        let url = format!("{}/flow_runs/{}", self.api_url, flow_run_id);
        let response = self.authorize(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!(
                "flow run {} not found, might be from a different workspace",
                flow_run_id
            );
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(status.as_u16(), body));
        }
        Ok(Some(response.json().await?))
    }

    /// Fetch every task run of a flow run, following pagination.
    pub async fn read_task_runs(&self, flow_run_id: &str) -> Result<Vec<TaskRun>> {
        let url = format!("{}/task_runs/filter", self.api_url);
        let mut task_runs = Vec::new();
        let mut offset = 0usize;
        loop {
            let body = serde_json::json!({
                "flow_runs": { "id": { "any_": [flow_run_id] } },
                "limit": TASK_RUN_PAGE_SIZE,
                "offset": offset,
            });
            let response = self
                .authorize(self.http.post(&url))
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Api(status.as_u16(), body));
            }
            let page: Vec<TaskRun> = response.json().await?;
            let page_len = page.len();
            task_runs.extend(page);
            if page_len < TASK_RUN_PAGE_SIZE {
                break;
            }
            offset += TASK_RUN_PAGE_SIZE;
        }
        Ok(task_runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_run(state: &str) -> TaskRun {
        serde_json::from_value(serde_json::json!({
            "state": { "type": state, "message": null }
        }))
        .unwrap()
    }

    #[test]
    fn terminal_states() {
        assert!(StateType::Completed.is_terminal());
        assert!(StateType::Failed.is_terminal());
        assert!(StateType::Crashed.is_terminal());
        assert!(StateType::Cancelled.is_terminal());
        assert!(!StateType::Running.is_terminal());
        assert!(!StateType::Scheduled.is_terminal());
    }

    #[test]
    fn unknown_state_deserializes() {
        let run = task_run("SOME_FUTURE_STATE");
        assert_eq!(run.state.state_type, StateType::Unknown);
        assert!(!run.state.state_type.is_terminal());
    }

    #[test]
    fn classification_counts_terminal_states() {
        let runs = vec![
            task_run("COMPLETED"),
            task_run("COMPLETED"),
            task_run("FAILED"),
            task_run("CRASHED"),
            task_run("CANCELLED"),
            task_run("RUNNING"),
        ];
        let stats = TaskRunStats::classify(&runs);
        assert_eq!(
            stats,
            TaskRunStats {
                total: 6,
                completed: 2,
                failed: 1,
                crashed: 1,
                cancelled: 1,
            }
        );
    }

    #[test]
    fn flow_run_deserializes_with_nullable_fields() {
        let run: FlowRun = serde_json::from_value(serde_json::json!({
            "id": "fr-1",
            "name": "stitching",
            "flow_id": "f-1",
            "deployment_id": null,
            "work_queue_name": "gpu",
            "flow_version": "1",
            "parameters": { "plate": "P01" },
            "tags": ["microscopy"],
            "created": "2023-01-05T10:00:00Z",
            "start_time": null,
            "end_time": null,
            "total_run_time": 12.5,
            "infrastructure_document_id": null,
            "created_by": null,
            "state_name": "Running",
            "state": { "type": "RUNNING", "message": null }
        }))
        .unwrap();
        assert_eq!(run.state.state_type, StateType::Running);
        assert!(run.start_time.is_none());
        assert_eq!(run.total_run_time, 12.5);
    }
}
