//! Summary aggregation over tracking-table log rows
//!
//! Each log row references a flow run and the SLURM jobs it spawned. Rows
//! are processed at most once: a finished run is summarized into the
//! summary table, a pending run is left for the next pass. The log row is
//! claimed (marked processed) before the summary row is created, and the
//! claim is released again if the create fails, so a crashed pass never
//! produces duplicate summary rows.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use mfp_common::airtable::{Record, TableClient};

use crate::orchestrator::{FlowRun, OrchestratorClient, TaskRunStats};
use crate::slurm::{parse_job_ids, JobAccounting, SlurmClient};

const PROCESSED_FIELD: &str = "processed";
const FLOW_RUN_ID_FIELD: &str = "flow-run-id";
const SLURM_JOBS_FIELD: &str = "slurm-jobs";
const DATE_FIELD: &str = "date";

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error(transparent)]
    Common(#[from] mfp_common::Error),

    #[error("log record {record_id} has no '{field}' field")]
    MissingField { record_id: String, field: String },
}

/// Counters of one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryStats {
    pub records: usize,
    pub rows_created: usize,
    pub skipped_processed: usize,
    pub skipped_pending: usize,
    pub skipped_missing: usize,
}

/// One pass of log-row aggregation.
pub struct Aggregator {
    log_table: TableClient,
    summary_table: TableClient,
    orchestrator: OrchestratorClient,
    slurm: SlurmClient,
}

fn required_field<'a>(record: &'a Record, field: &str) -> Result<&'a str, SummaryError> {
    record
        .field_str(field)
        .ok_or_else(|| SummaryError::MissingField {
            record_id: record.id.clone(),
            field: field.to_string(),
        })
}

impl Aggregator {
    pub fn new(
        log_table: TableClient,
        summary_table: TableClient,
        orchestrator: OrchestratorClient,
        slurm: SlurmClient,
    ) -> Self {
        Self {
            log_table,
            summary_table,
            orchestrator,
            slurm,
        }
    }

    pub async fn run(&self) -> Result<SummaryStats, SummaryError> {
        let records = self.log_table.list_all().await?;
        info!("found {} log record(s)", records.len());

        let mut stats = SummaryStats {
            records: records.len(),
            ..SummaryStats::default()
        };
        for record in &records {
            if record.fields.contains_key(PROCESSED_FIELD) {
                stats.skipped_processed += 1;
                continue;
            }
            self.process_record(record, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn process_record(
        &self,
        record: &Record,
        stats: &mut SummaryStats,
    ) -> Result<(), SummaryError> {
        let flow_run_id = required_field(record, FLOW_RUN_ID_FIELD)?;

        let Some(flow_run) = self.orchestrator.read_flow_run(flow_run_id).await? else {
            stats.skipped_missing += 1;
            return Ok(());
        };
        if !flow_run.state.state_type.is_terminal() {
            info!(
                "flow run {} still {:?}, leaving for the next pass",
                flow_run_id, flow_run.state.state_type
            );
            stats.skipped_pending += 1;
            return Ok(());
        }

        let task_runs = self.orchestrator.read_task_runs(flow_run_id).await?;
        let task_run_stats = TaskRunStats::classify(&task_runs);

        let job_ids = parse_job_ids(required_field(record, SLURM_JOBS_FIELD)?)?;
        let accounting = self.slurm.job_accounting(&job_ids).await?;

        let row = build_summary_row(record, &flow_run, task_run_stats, &accounting);

        // Claim the log row before writing the summary so a concurrent
        // pass cannot summarize it twice; release the claim if the
        // create fails.
        self.log_table
            .update(&record.id, &claim_fields(true))
            .await?;
        if let Err(e) = self.summary_table.create(&row).await {
            self.log_table
                .update(&record.id, &claim_fields(false))
                .await?;
            return Err(e.into());
        }
        info!("summarized flow run {}", flow_run_id);
        stats.rows_created += 1;
        Ok(())
    }
}

fn claim_fields(claimed: bool) -> Map<String, Value> {
    let mut fields = Map::new();
    let value = if claimed {
        Value::Bool(true)
    } else {
        Value::Null
    };
    fields.insert(PROCESSED_FIELD.to_string(), value);
    fields
}

/// Build the summary-table row for one finished flow run.
pub fn build_summary_row(
    record: &Record,
    flow_run: &FlowRun,
    task_runs: TaskRunStats,
    accounting: &JobAccounting,
) -> Map<String, Value> {
    let logged_date = record.field_str(DATE_FIELD).unwrap_or_default();
    let time_or_logged = |time: &Option<chrono::DateTime<chrono::Utc>>| {
        time.map(|t| t.to_rfc3339())
            .unwrap_or_else(|| logged_date.to_string())
    };

    let mut row = Map::new();
    let mut put = |name: &str, value: Value| {
        row.insert(name.to_string(), value);
    };
    put(FLOW_RUN_ID_FIELD, Value::String(flow_run.id.clone()));
    put(
        SLURM_JOBS_FIELD,
        Value::String(record.field_str(SLURM_JOBS_FIELD).unwrap_or_default().to_string()),
    );
    put("slurm-job-start", Value::String(logged_date.to_string()));
    put("flow-created", Value::String(time_or_logged(&flow_run.created)));
    put("name", Value::String(flow_run.name.clone()));
    put("flow-id", Value::String(flow_run.flow_id.clone()));
    put(
        "deployment-id",
        Value::String(flow_run.deployment_id.clone().unwrap_or_default()),
    );
    put(
        "work-queue-name",
        Value::String(flow_run.work_queue_name.clone().unwrap_or_default()),
    );
    put(
        "flow-version",
        Value::String(flow_run.flow_version.clone().unwrap_or_default()),
    );
    put(
        "parameters",
        Value::String(flow_run.parameters.to_string()),
    );
    put(
        "tags",
        Value::String(serde_json::to_string(&flow_run.tags).unwrap_or_default()),
    );
    put("flow-start", Value::String(time_or_logged(&flow_run.start_time)));
    put("flow-end", Value::String(time_or_logged(&flow_run.end_time)));
    put("flow-run-time", serde_json::json!(flow_run.total_run_time));
    put(
        "infrastructure-document-id",
        Value::String(
            flow_run
                .infrastructure_document_id
                .clone()
                .unwrap_or_default(),
        ),
    );
    put(
        "created-by-user",
        Value::String(
            flow_run
                .created_by
                .as_ref()
                .and_then(|c| c.display_value.clone())
                .unwrap_or_default(),
        ),
    );
    put(
        "final-flow-run-state",
        Value::String(
            flow_run
                .state_name
                .clone()
                .unwrap_or_default()
                .to_uppercase(),
        ),
    );
    put(
        "final-flow-run-message",
        Value::String(flow_run.state.message.clone().unwrap_or_default()),
    );
    put("task-runs", serde_json::json!(task_runs.total));
    put("completed-task-runs", serde_json::json!(task_runs.completed));
    put("failed-task-runs", serde_json::json!(task_runs.failed));
    put("cancelled-task-runs", serde_json::json!(task_runs.cancelled));
    put("crashed-task-runs", serde_json::json!(task_runs.crashed));
    put("flow-compute-time", serde_json::json!(accounting.compute_time));
    put("cpus", serde_json::json!(accounting.cpus));
    put("memory", serde_json::json!(accounting.memory));
    put("gres", Value::String(accounting.gres_json()));
    put("gpus", serde_json::json!(accounting.gpu_total()));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{StateType, TaskRun};

    fn log_record() -> Record {
        serde_json::from_value(serde_json::json!({
            "id": "recLog1",
            "fields": {
                "flow-run-id": "fr-1",
                "slurm-jobs": "60236,60237",
                "date": "2023-01-05"
            }
        }))
        .unwrap()
    }

    fn finished_flow_run() -> FlowRun {
        serde_json::from_value(serde_json::json!({
            "id": "fr-1",
            "name": "stitch-plate",
            "flow_id": "f-1",
            "deployment_id": "d-1",
            "work_queue_name": "gpu",
            "flow_version": "3",
            "parameters": { "plate": "P01" },
            "tags": ["microscopy"],
            "created": "2023-01-05T09:00:00Z",
            "start_time": "2023-01-05T09:05:00Z",
            "end_time": null,
            "total_run_time": 300.5,
            "infrastructure_document_id": "i-1",
            "created_by": { "display_value": "facility-bot" },
            "state_name": "Completed",
            "state": { "type": "COMPLETED", "message": "All states completed." }
        }))
        .unwrap()
    }

    #[test]
    fn summary_row_carries_run_and_accounting_fields() {
        let mut accounting = JobAccounting {
            compute_time: 5400,
            cpus: 12,
            memory: 96000,
            gres: Default::default(),
        };
        accounting.gres.insert("a100".to_string(), 3);

        let task_runs: Vec<TaskRun> = (0..5)
            .map(|i| {
                serde_json::from_value(serde_json::json!({
                    "state": { "type": if i < 4 { "COMPLETED" } else { "FAILED" } }
                }))
                .unwrap()
            })
            .collect();

        let row = build_summary_row(
            &log_record(),
            &finished_flow_run(),
            TaskRunStats::classify(&task_runs),
            &accounting,
        );

        assert_eq!(row["flow-run-id"], "fr-1");
        assert_eq!(row["slurm-jobs"], "60236,60237");
        assert_eq!(row["name"], "stitch-plate");
        assert_eq!(row["final-flow-run-state"], "COMPLETED");
        assert_eq!(row["parameters"], r#"{"plate":"P01"}"#);
        // Missing end time falls back to the logged date.
        assert_eq!(row["flow-end"], "2023-01-05");
        assert_eq!(row["task-runs"], 5);
        assert_eq!(row["completed-task-runs"], 4);
        assert_eq!(row["failed-task-runs"], 1);
        assert_eq!(row["flow-compute-time"], 5400);
        assert_eq!(row["cpus"], 12);
        assert_eq!(row["memory"], 96000);
        assert_eq!(row["gres"], r#"{"a100":3}"#);
        assert_eq!(row["gpus"], 3);
    }

    #[test]
    fn claim_release_clears_the_flag() {
        assert_eq!(claim_fields(true)["processed"], Value::Bool(true));
        assert_eq!(claim_fields(false)["processed"], Value::Null);
    }

    #[test]
    fn missing_flow_run_id_is_reported() {
        let record: Record = serde_json::from_value(serde_json::json!({
            "id": "recBad",
            "fields": { "slurm-jobs": "1" }
        }))
        .unwrap();
        let err = required_field(&record, FLOW_RUN_ID_FIELD).unwrap_err();
        assert!(matches!(err, SummaryError::MissingField { .. }));
    }

    #[test]
    fn non_terminal_states_are_not_summarized() {
        for state in [StateType::Running, StateType::Scheduled, StateType::Pending] {
            assert!(!state.is_terminal());
        }
    }
}
