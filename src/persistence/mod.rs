//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::RunResult;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Event that started the run, `None` for direct runs
    pub trigger: Option<String>,

    /// Final status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if it did)
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of steps
    pub total_steps: usize,

    /// Number of completed steps
    pub completed_steps: usize,

    /// The step that halted the run
    pub failed_step: Option<String>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary, replacing one with the same ID
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, execution_id: Uuid) -> Result<Option<RunSummary>>;

    /// All runs for a pipeline, newest first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>>;

    /// The latest `limit` runs across all pipelines, newest first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// All pipeline names with recorded runs
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history` runs)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(runs: &mut [RunSummary]) {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.execution_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, execution_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&execution_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let mut runs: Vec<RunSummary> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        newest_first(&mut runs);
        Ok(runs)
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut runs: Vec<RunSummary> = self.runs.read().await.values().cloned().collect();
        newest_first(&mut runs);
        runs.truncate(limit);
        Ok(runs)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .runs
            .read()
            .await
            .values()
            .map(|run| run.pipeline_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a finished run
pub fn create_summary(result: &RunResult) -> RunSummary {
    RunSummary {
        execution_id: result.execution_id,
        pipeline_name: result.pipeline_name.clone(),
        trigger: result.trigger.as_ref().map(ToString::to_string),
        status: result.status,
        started_at: result.started_at,
        completed_at: result.completed_at,
        total_steps: result.outcomes.len(),
        completed_steps: result.completed_steps(),
        failed_step: result.halting_step().map(|o| o.step_id.clone()),
    }
}
