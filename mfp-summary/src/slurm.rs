//! SLURM accounting via `sacct`
//!
//! Aggregates elapsed compute time, required CPUs and memory, and the
//! allocated GPU models over the jobs of one flow run. The accounting
//! tool reports one generic `gpu` TRES entry alongside the model-specific
//! ones; only the model entries are counted.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use mfp_common::{Error, Result};

#[derive(Debug, Deserialize)]
struct AccountingReport {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct Job {
    tres: Tres,
    required: Required,
    time: Time,
}

#[derive(Debug, Deserialize)]
struct Tres {
    #[serde(default)]
    allocated: Vec<TresEntry>,
}

#[derive(Debug, Deserialize)]
struct TresEntry {
    #[serde(rename = "type")]
    tres_type: String,
    name: String,
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct Required {
    #[serde(default)]
    memory: u64,
    #[serde(rename = "CPUs", default)]
    cpus: u64,
}

#[derive(Debug, Deserialize)]
struct Time {
    #[serde(default)]
    elapsed: u64,
}

/// Resource totals over a set of jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobAccounting {
    /// Summed elapsed seconds.
    pub compute_time: u64,
    pub cpus: u64,
    pub memory: u64,
    /// GPU model name to allocated count.
    pub gres: BTreeMap<String, u64>,
}

impl JobAccounting {
    pub fn gpu_total(&self) -> u64 {
        self.gres.values().sum()
    }

    pub fn gres_json(&self) -> String {
        serde_json::to_string(&self.gres).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Sum resources over the jobs of an accounting report.
pub fn parse_accounting(json: &[u8]) -> Result<JobAccounting> {
    let report: AccountingReport =
        serde_json::from_slice(json).map_err(|e| Error::InvalidInput(e.to_string()))?;

    let mut accounting = JobAccounting::default();
    for job in &report.jobs {
        for entry in &job.tres.allocated {
            // The bare "gpu" entry duplicates the model-specific counts.
            if entry.tres_type == "gres" && entry.name != "gpu" {
                *accounting.gres.entry(entry.name.clone()).or_insert(0) += entry.count;
            }
        }
        accounting.memory += job.required.memory;
        accounting.cpus += job.required.cpus;
        accounting.compute_time += job.time.elapsed;
    }
    Ok(accounting)
}

/// Wrapper around the `sacct` command line tool.
#[derive(Debug, Clone)]
pub struct SlurmClient {
    sacct: PathBuf,
}

impl Default for SlurmClient {
    fn default() -> Self {
        Self {
            sacct: PathBuf::from("sacct"),
        }
    }
}

impl SlurmClient {
    /// Use an alternative accounting command, e.g. a wrapper script.
    pub fn with_command(sacct: impl Into<PathBuf>) -> Self {
        Self {
            sacct: sacct.into(),
        }
    }

    /// Query accounting for the given job ids.
    pub async fn job_accounting(&self, job_ids: &[u64]) -> Result<JobAccounting> {
        let ids = job_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        debug!("querying accounting for job(s) {}", ids);
        let output = Command::new(&self.sacct)
            .arg("-j")
            .arg(&ids)
            .arg("--json")
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::InvalidInput(format!(
                "sacct -j {} failed: {}",
                ids,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_accounting(&output.stdout)
    }
}

/// Parse the comma-separated `slurm-jobs` field of a log row.
pub fn parse_job_ids(value: &str) -> Result<Vec<u64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| Error::InvalidInput(format!("bad job id '{}'", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "jobs": [
            {
                "tres": { "allocated": [
                    { "type": "gres", "name": "gpu", "count": 2 },
                    { "type": "gres", "name": "a100", "count": 2 },
                    { "type": "cpu", "name": "", "count": 8 }
                ] },
                "required": { "memory": 64000, "CPUs": 8 },
                "time": { "elapsed": 3600 }
            },
            {
                "tres": { "allocated": [
                    { "type": "gres", "name": "gpu", "count": 1 },
                    { "type": "gres", "name": "a100", "count": 1 }
                ] },
                "required": { "memory": 32000, "CPUs": 4 },
                "time": { "elapsed": 1800 }
            }
        ]
    }"#;

    #[test]
    fn sums_resources_and_skips_bare_gpu_entry() {
        let accounting = parse_accounting(REPORT.as_bytes()).unwrap();
        assert_eq!(accounting.compute_time, 5400);
        assert_eq!(accounting.cpus, 12);
        assert_eq!(accounting.memory, 96000);
        assert_eq!(accounting.gres.get("a100"), Some(&3));
        assert_eq!(accounting.gres.len(), 1);
        assert_eq!(accounting.gpu_total(), 3);
    }

    #[test]
    fn empty_report_sums_to_zero() {
        let accounting = parse_accounting(br#"{"jobs": []}"#).unwrap();
        assert_eq!(accounting, JobAccounting::default());
        assert_eq!(accounting.gres_json(), "{}");
    }

    #[test]
    fn job_id_list_parsing() {
        assert_eq!(parse_job_ids("60236").unwrap(), vec![60236]);
        assert_eq!(parse_job_ids("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_job_ids("1,x").is_err());
    }
}
