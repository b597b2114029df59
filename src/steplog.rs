//! Per-session JSON activity log: one record per executed operation plus a
//! closing summary, flushed on every termination path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::errors::PilotResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub operation: String,
    pub detail: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub resource_usage: ResourceUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub objective: String,
    pub provider: String,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub status: String,
    pub total_time_seconds: f64,
    pub final_resource_usage: ResourceUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionLog {
    task_info: TaskInfo,
    steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<SessionSummary>,
}

pub struct StepLogger {
    log: SessionLog,
    log_dir: PathBuf,
    system: System,
}

impl StepLogger {
    pub fn new(objective: &str, provider: &str, log_dir: &Path) -> Self {
        Self {
            log: SessionLog {
                task_info: TaskInfo {
                    objective: objective.to_string(),
                    provider: provider.to_string(),
                    start_time: Utc::now(),
                },
                steps: Vec::new(),
                summary: None,
            },
            log_dir: log_dir.to_path_buf(),
            system: System::new(),
        }
    }

    fn snapshot(&mut self) -> ResourceUsage {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f32 / total as f32 * 100.0
        };
        ResourceUsage {
            cpu_percent: self.system.global_cpu_usage(),
            memory_percent,
        }
    }

    pub fn record_step(&mut self, operation: &str, detail: &str, started: DateTime<Utc>) {
        let end_time = Utc::now();
        let duration_seconds = crate::session::duration_secs(end_time - started);
        let resource_usage = self.snapshot();
        tracing::debug!(
            operation = %operation,
            duration = duration_seconds,
            "step recorded"
        );
        self.log.steps.push(StepRecord {
            operation: operation.to_string(),
            detail: detail.to_string(),
            start_time: started,
            end_time,
            duration_seconds,
            resource_usage,
        });
    }

    pub fn step_count(&self) -> usize {
        self.log.steps.len()
    }

    /// Close the log with a final status and write it out. Called exactly
    /// once per session, whichever way the session ends.
    pub fn finish(&mut self, status: &str) -> PilotResult<PathBuf> {
        let total_time_seconds =
            crate::session::duration_secs(Utc::now() - self.log.task_info.start_time);
        self.log.summary = Some(SessionSummary {
            status: status.to_string(),
            total_time_seconds,
            final_resource_usage: self.snapshot(),
        });

        std::fs::create_dir_all(&self.log_dir)?;
        let path = self.log_dir.join(format!(
            "log_{}.json",
            self.log.task_info.start_time.format("%Y%m%d_%H%M%S")
        ));
        std::fs::write(&path, serde_json::to_string_pretty(&self.log)?)?;
        tracing::info!(path = %path.display(), status = %status, "session log written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sp-log-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn finished_log_has_steps_and_summary() {
        let dir = temp_log_dir();
        let mut logger = StepLogger::new("open settings", "gpt-ocr", &dir);
        logger.record_step("click", "Settings", Utc::now());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let path = logger.finish("completed").unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed["task_info"]["objective"], "open settings");
        assert_eq!(parsed["steps"].as_array().unwrap().len(), 1);
        assert_eq!(parsed["steps"][0]["operation"], "click");
        assert_eq!(parsed["summary"]["status"], "completed");
        assert!(parsed["summary"]["total_time_seconds"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn failure_status_is_persisted_too() {
        let dir = temp_log_dir();
        let mut logger = StepLogger::new("obj", "prov", &dir);
        let path = logger.finish("failed: retries exhausted").unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed["summary"]["status"], "failed: retries exhausted");
        assert!(parsed["steps"].as_array().unwrap().is_empty());
    }
}
