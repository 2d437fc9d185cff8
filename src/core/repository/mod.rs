//! Storage of job and step executions, used to restart a failed or stopped
//! job where it left off.

use std::collections::BTreeMap;

use chrono::Utc;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::BatchError;

use super::{job::JobExecution, parameters::JobParameters, step::StepExecution};

#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
pub mod json;

/// Records every run attempt of every job.
///
/// Step executions are append-only: once a finished step execution is stored
/// it is never modified.
pub trait JobRepository: Send + Sync {
    /// Creates a job execution with a new, monotonically increasing id.
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError>;

    /// Stores the status, exit status, timestamps and failure of a job execution.
    fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;

    fn append_step_execution(
        &self,
        job_execution_id: u64,
        step_execution: &StepExecution,
    ) -> Result<(), BatchError>;

    fn find_job_execution(&self, job_execution_id: u64) -> Result<Option<JobExecution>, BatchError>;

    /// Executions of the job instance identified by name and identifying parameters, oldest first.
    fn find_job_executions(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Vec<JobExecution>, BatchError>;

    /// Most recent execution of any instance of `job_name`.
    fn find_last_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>, BatchError>;

    /// Step executions recorded for `job_execution_id`, in execution order.
    fn find_step_executions(&self, job_execution_id: u64) -> Result<Vec<StepExecution>, BatchError> {
        self.find_job_execution(job_execution_id)?
            .map(|job_execution| job_execution.step_executions)
            .ok_or(BatchError::JobExecutionNotFound(job_execution_id))
    }

    /// Id of the latest execution of the job instance when it failed or was stopped.
    fn find_latest_incomplete_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<u64>, BatchError> {
        Ok(self
            .find_job_executions(job_name, parameters)?
            .last()
            .filter(|job_execution| job_execution.status.is_restartable())
            .map(|job_execution| job_execution.id))
    }
}

/// Content of a repository, shared by the in-memory and file backed implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RepositoryState {
    last_id: u64,
    executions: BTreeMap<u64, JobExecution>,
}

impl RepositoryState {
    fn create(&mut self, job_name: &str, parameters: &JobParameters) -> JobExecution {
        self.last_id += 1;
        let job_execution = JobExecution::new(self.last_id, job_name, parameters.clone());
        self.executions
            .insert(job_execution.id, job_execution.clone());
        debug!("Created job execution {} for {}", self.last_id, job_name);
        job_execution
    }

    fn update(&mut self, job_execution: &JobExecution) -> Result<(), BatchError> {
        let stored = self
            .executions
            .get_mut(&job_execution.id)
            .ok_or(BatchError::JobExecutionNotFound(job_execution.id))?;

        stored.status = job_execution.status;
        stored.exit_status = job_execution.exit_status.clone();
        stored.start_time = job_execution.start_time;
        stored.end_time = job_execution.end_time;
        stored.restart_of = job_execution.restart_of;
        stored.restart_node = job_execution.restart_node.clone();
        stored.failure = job_execution.failure.clone();
        stored.last_updated = Some(Utc::now());
        Ok(())
    }

    fn append(&mut self, job_execution_id: u64, step_execution: &StepExecution) -> Result<(), BatchError> {
        let stored = self
            .executions
            .get_mut(&job_execution_id)
            .ok_or(BatchError::JobExecutionNotFound(job_execution_id))?;

        if stored
            .step_executions
            .iter()
            .any(|existing| existing.id == step_execution.id)
        {
            return Err(BatchError::Repository(format!(
                "step execution {} is already stored",
                step_execution.id
            )));
        }

        stored.step_executions.push(step_execution.clone());
        stored.last_updated = Some(Utc::now());
        Ok(())
    }

    fn find(&self, job_execution_id: u64) -> Option<JobExecution> {
        self.executions.get(&job_execution_id).cloned()
    }

    fn find_instance(&self, job_name: &str, parameters: &JobParameters) -> Vec<JobExecution> {
        let identity = parameters.identity();
        self.executions
            .values()
            .filter(|job_execution| {
                job_execution.job_name == job_name
                    && job_execution.parameters.identity() == identity
            })
            .cloned()
            .collect()
    }

    fn find_last(&self, job_name: &str) -> Option<JobExecution> {
        self.executions
            .values()
            .rev()
            .find(|job_execution| job_execution.job_name == job_name)
            .cloned()
    }
}

/// Thread-safe repository kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        Ok(self.state.lock().create(job_name, parameters))
    }

    fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        self.state.lock().update(job_execution)
    }

    fn append_step_execution(
        &self,
        job_execution_id: u64,
        step_execution: &StepExecution,
    ) -> Result<(), BatchError> {
        self.state.lock().append(job_execution_id, step_execution)
    }

    fn find_job_execution(&self, job_execution_id: u64) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.state.lock().find(job_execution_id))
    }

    fn find_job_executions(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Vec<JobExecution>, BatchError> {
        Ok(self.state.lock().find_instance(job_name, parameters))
    }

    fn find_last_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.state.lock().find_last(job_name))
    }
}
