use std::sync::Arc;

use log::info;
use tokio::task::JoinHandle;

use crate::BatchError;

use super::{
    job::{Job, JobExecution, JobResult},
    parameters::JobParameters,
    repository::JobRepository,
    status::BatchStatus,
};

/// Runs jobs against a shared [`JobRepository`].
///
/// Running a job instance that has a failed or stopped execution restarts it;
/// running one that already completed is refused.
#[derive(Clone)]
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
}

impl JobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    pub fn get_repository(&self) -> &dyn JobRepository {
        self.repository.as_ref()
    }

    /// Runs `job` synchronously and returns its execution, whatever its status.
    ///
    /// The job incrementer, if any, is applied to `parameters` first, together
    /// with the parameters of the last execution of the job in the repository.
    ///
    /// # Errors
    /// - `BatchError::JobAlreadyComplete` when the job instance already completed
    /// - `BatchError::Repository` when an execution of the instance is still running
    /// - any error of [`Job::run`] or [`Job::restart`]
    pub fn run(&self, job: &dyn Job, parameters: JobParameters) -> JobResult<JobExecution> {
        let previous = self.repository.find_last_job_execution(job.get_name())?;
        let parameters = job.next_parameters(
            &parameters,
            previous.as_ref().map(|job_execution| &job_execution.parameters),
        );
        let executions = self
            .repository
            .find_job_executions(job.get_name(), &parameters)?;

        if let Some(latest) = executions.last() {
            match latest.status {
                BatchStatus::Completed => return Err(BatchError::JobAlreadyComplete(latest.id)),
                BatchStatus::Starting | BatchStatus::Started => {
                    return Err(BatchError::Repository(format!(
                        "job {} already has a running execution {}",
                        job.get_name(),
                        latest.id
                    )));
                }
                BatchStatus::Failed | BatchStatus::Stopped => {
                    info!(
                        "Job {} has an incomplete execution {}, restarting it",
                        job.get_name(),
                        latest.id
                    );
                    return job.restart(self.repository.as_ref(), latest.id);
                }
            }
        }

        job.run(self.repository.as_ref(), parameters)
    }

    /// Restarts the failed or stopped execution `job_execution_id` of `job`.
    pub fn restart(&self, job: &dyn Job, job_execution_id: u64) -> JobResult<JobExecution> {
        job.restart(self.repository.as_ref(), job_execution_id)
    }

    /// Runs `job` on the tokio blocking pool and returns without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch<J>(&self, job: Arc<J>, parameters: JobParameters) -> JoinHandle<JobResult<JobExecution>>
    where
        J: Job + Send + 'static,
    {
        let launcher = self.clone();
        tokio::task::spawn_blocking(move || launcher.run(job.as_ref(), parameters))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::core::{
        job::JobBuilder,
        parameters::{JobParameter, JobParametersBuilder, RunIdIncrementer},
        repository::InMemoryJobRepository,
        step::StepExecution,
        tasklet::{RepeatStatus, TaskletStepBuilder},
    };

    fn noop(_: &StepExecution, _: &JobParameters) -> Result<RepeatStatus, BatchError> {
        Ok(RepeatStatus::Finished)
    }

    fn launcher() -> JobLauncher {
        JobLauncher::new(Arc::new(InMemoryJobRepository::new()))
    }

    #[test]
    fn completed_instance_is_not_run_twice() -> Result<()> {
        let step = TaskletStepBuilder::new("load").tasklet(&noop).build()?;
        let job = JobBuilder::new().name("orders".to_string()).start(&step).build()?;
        let launcher = launcher();
        let parameters = JobParametersBuilder::new().add_string("day", "2024-02-14").build();

        let first = launcher.run(&job, parameters.clone())?;
        assert_eq!(first.status, BatchStatus::Completed);

        assert!(matches!(
            launcher.run(&job, parameters),
            Err(BatchError::JobAlreadyComplete(id)) if id == first.id
        ));
        Ok(())
    }

    #[test]
    fn incrementer_makes_each_run_distinct() -> Result<()> {
        let step = TaskletStepBuilder::new("load").tasklet(&noop).build()?;
        let incrementer = RunIdIncrementer::default();
        let job = JobBuilder::new()
            .name("orders".to_string())
            .start(&step)
            .incrementer(&incrementer)
            .build()?;
        let launcher = launcher();

        let first = launcher.run(&job, JobParameters::new())?;
        let second = launcher.run(&job, first.parameters.clone())?;

        assert_eq!(first.parameters.get_long("run.id"), Some(1));
        assert_eq!(second.parameters.get_long("run.id"), Some(2));
        assert_eq!(second.status, BatchStatus::Completed);
        Ok(())
    }

    #[test]
    fn lookalike_parameters_are_distinct_instances() -> Result<()> {
        let step = TaskletStepBuilder::new("load").tasklet(&noop).build()?;
        let job = JobBuilder::new().name("orders".to_string()).start(&step).build()?;
        let launcher = launcher();

        let single = JobParametersBuilder::new().add_string("a", "1;b=2").build();
        let pair = JobParametersBuilder::new()
            .add_string("a", "1")
            .add_string("b", "2")
            .build();
        assert_eq!(launcher.run(&job, single)?.status, BatchStatus::Completed);
        assert_eq!(launcher.run(&job, pair)?.status, BatchStatus::Completed);

        let text = JobParametersBuilder::new()
            .add("batch", JobParameter::String("5".to_string()), true)
            .build();
        let number = JobParametersBuilder::new()
            .add("batch", JobParameter::Long(5), true)
            .build();
        assert_eq!(launcher.run(&job, text)?.status, BatchStatus::Completed);
        assert_eq!(launcher.run(&job, number)?.status, BatchStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn launch_runs_on_blocking_pool() -> Result<()> {
        let step: &'static _ = Box::leak(Box::new(
            TaskletStepBuilder::new("load").tasklet(&noop).build()?,
        ));
        let job = Arc::new(JobBuilder::new().name("orders".to_string()).start(step).build()?);
        let launcher = launcher();

        let job_execution = launcher.launch(job, JobParameters::new()).await??;

        assert_eq!(job_execution.status, BatchStatus::Completed);
        assert_eq!(
            launcher
                .get_repository()
                .find_job_execution(job_execution.id)?
                .map(|stored| stored.status),
            Some(BatchStatus::Completed)
        );
        Ok(())
    }
}
