use std::{collections::HashMap, fmt::Write as _, process::ExitCode};

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    flow::{EndState, Flow, FlowBuilder, FlowNode, Next},
    parameters::{JobParameters, JobParametersIncrementer, JobParametersValidator},
    repository::JobRepository,
    status::{BatchStatus, ExitStatus},
    step::{ErrorKind, Step, StepContext, StepExecution, StepOutcome, StopHandle},
};

/// Type alias for job execution results.
///
/// A `JobResult` is a `Result` that contains either:
/// - A finished `JobExecution`, whatever its status
/// - A `BatchError` when the job could not be run at all
pub type JobResult<T> = Result<T, BatchError>;

/// Process exit code of a completed job.
pub const EXIT_CODE_COMPLETED: u8 = 0;
/// Process exit code of a failed job.
pub const EXIT_CODE_FAILED: u8 = 1;
/// Process exit code of a job that did not reach an end state.
pub const EXIT_CODE_UNFINISHED: u8 = 2;
/// Process exit code of a stopped job.
pub const EXIT_CODE_STOPPED: u8 = 3;

/// Why a job execution failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobFailure {
    /// The flow reached its FAILED end after `step_name`.
    ///
    /// `kind` is set when the step itself failed, and is `None` when the step
    /// succeeded but its exit status was routed to the FAILED end.
    Step {
        step_name: String,
        kind: Option<ErrorKind>,
        exit_status: ExitStatus,
    },
    /// A decider returned an error.
    Decider { node: String, detail: String },
    /// No transition rule matched the exit status of `node`.
    UnresolvedTransition { node: String, exit_code: String },
}

/// One run attempt of a job instance.
///
/// A job instance is identified by the job name and its identifying
/// parameters. Each run or restart of the instance creates a new execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Identifier assigned by the job repository
    pub id: u64,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    /// Nodes executed by this run, in execution order
    pub step_executions: Vec<StepExecution>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Execution this one restarts
    pub restart_of: Option<u64>,
    /// Node a restart of this execution resumes at, set when the flow stopped
    pub restart_node: Option<String>,
    pub failure: Option<JobFailure>,
}

impl JobExecution {
    pub fn new(id: u64, job_name: &str, parameters: JobParameters) -> Self {
        Self {
            id,
            job_name: job_name.to_string(),
            parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            step_executions: Vec::new(),
            start_time: None,
            end_time: None,
            last_updated: None,
            restart_of: None,
            restart_node: None,
            failure: None,
        }
    }

    /// Latest execution of the node named `name` in this run.
    pub fn get_step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|step_execution| step_execution.name == name)
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Exit code a command line runner should return for this execution.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            BatchStatus::Completed => EXIT_CODE_COMPLETED,
            BatchStatus::Failed => EXIT_CODE_FAILED,
            BatchStatus::Stopped => EXIT_CODE_STOPPED,
            BatchStatus::Starting | BatchStatus::Started => EXIT_CODE_UNFINISHED,
        }
    }

    /// Human readable account of a failed execution, `None` when it did not fail.
    pub fn failure_report(&self) -> Option<String> {
        let failure = self.failure.as_ref()?;

        let mut report = format!(
            "Job {} (execution {}) failed: ",
            self.job_name, self.id
        );
        let _ = match failure {
            JobFailure::Step {
                step_name,
                kind: Some(kind),
                exit_status,
            } => write!(
                report,
                "step '{}' failed ({:?}): {}",
                step_name,
                kind,
                exit_status.description()
            ),
            JobFailure::Step {
                step_name,
                kind: None,
                exit_status,
            } => write!(
                report,
                "exit status {} of step '{}' ends the job as FAILED",
                exit_status, step_name
            ),
            JobFailure::Decider { node, detail } => {
                write!(report, "decider '{}' failed: {}", node, detail)
            }
            JobFailure::UnresolvedTransition { node, exit_code } => write!(
                report,
                "no transition from '{}' matches exit code '{}'",
                node, exit_code
            ),
        };

        for step_execution in &self.step_executions {
            let _ = write!(report, "\n  {}", step_execution);
        }

        Some(report)
    }
}

impl From<&JobExecution> for ExitCode {
    fn from(job_execution: &JobExecution) -> Self {
        ExitCode::from(job_execution.exit_code())
    }
}

/// Represents a job that can be executed.
///
/// A job walks a [`Flow`] of steps and deciders and records every run in a
/// [`JobRepository`], which makes failed or stopped runs restartable.
///
/// Business failures are reported through the returned [`JobExecution`]:
/// `Err` is only returned when the job could not run, for instance because
/// the parameters are invalid or the repository failed.
pub trait Job: Sync {
    fn get_name(&self) -> &str;

    /// Runs a new execution of the job instance identified by `parameters`.
    fn run(&self, repository: &dyn JobRepository, parameters: JobParameters) -> JobResult<JobExecution>;

    /// Runs a new execution that resumes the failed or stopped execution `job_execution_id`.
    ///
    /// # Errors
    /// - `BatchError::JobExecutionNotFound` when the execution does not exist
    /// - `BatchError::JobAlreadyComplete` when the execution completed
    fn restart(&self, repository: &dyn JobRepository, job_execution_id: u64) -> JobResult<JobExecution>;

    /// Parameters of the next run, derived from `parameters` and from the
    /// parameters of the last recorded execution of the job.
    fn next_parameters(&self, parameters: &JobParameters, _previous: Option<&JobParameters>) -> JobParameters {
        parameters.clone()
    }
}

/// Represents an instance of a job.
///
/// A `JobInstance` is created through the [`JobBuilder`] and contains:
/// - A unique identifier
/// - A name for the job
/// - The flow of steps and deciders to walk
/// - An optional validator and incrementer for the job parameters
///
/// The same instance can be run any number of times.
pub struct JobInstance<'a> {
    /// Unique identifier for this job instance
    id: Uuid,
    /// Human-readable name for the job
    name: String,
    flow: Flow<'a>,
    validator: Option<JobParametersValidator>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    stop_handle: StopHandle,
}

impl Job for JobInstance<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn run(&self, repository: &dyn JobRepository, parameters: JobParameters) -> JobResult<JobExecution> {
        if let Some(validator) = &self.validator {
            validator.validate(&parameters)?;
        }

        let job_execution = repository.create_job_execution(&self.name, &parameters)?;
        let start = self.flow.get_start().to_string();
        self.execute(repository, job_execution, &start, HashMap::new())
    }

    fn restart(&self, repository: &dyn JobRepository, job_execution_id: u64) -> JobResult<JobExecution> {
        let previous = repository
            .find_job_execution(job_execution_id)?
            .ok_or(BatchError::JobExecutionNotFound(job_execution_id))?;

        if previous.job_name != self.name {
            return Err(BatchError::Configuration(format!(
                "job execution {} belongs to job {}, not {}",
                job_execution_id, previous.job_name, self.name
            )));
        }

        match previous.status {
            BatchStatus::Completed => return Err(BatchError::JobAlreadyComplete(job_execution_id)),
            BatchStatus::Starting | BatchStatus::Started => {
                return Err(BatchError::Repository(format!(
                    "job execution {} is still running",
                    job_execution_id
                )));
            }
            BatchStatus::Failed | BatchStatus::Stopped => {}
        }

        // Exit statuses of the nodes completed by earlier runs of this instance.
        let mut completed = HashMap::new();
        for job_execution in repository.find_job_executions(&self.name, &previous.parameters)? {
            if job_execution.id > previous.id {
                continue;
            }
            for step_execution in job_execution.step_executions {
                if step_execution.status == BatchStatus::Completed {
                    completed.insert(step_execution.name, step_execution.exit_status);
                }
            }
        }

        let start = match &previous.restart_node {
            Some(node) => {
                completed.remove(node);
                node.clone()
            }
            None => self.flow.get_start().to_string(),
        };

        let mut job_execution = repository.create_job_execution(&self.name, &previous.parameters)?;
        job_execution.restart_of = Some(previous.id);

        info!(
            "Restarting job: {}, execution {} resumes execution {} at {}",
            self.name, job_execution.id, previous.id, start
        );

        self.execute(repository, job_execution, &start, completed)
    }

    fn next_parameters(&self, parameters: &JobParameters, previous: Option<&JobParameters>) -> JobParameters {
        match self.incrementer {
            Some(incrementer) => incrementer.next(parameters, previous),
            None => parameters.clone(),
        }
    }
}

impl JobInstance<'_> {
    /// Handle to request this job to stop after the chunk in progress.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    fn execute(
        &self,
        repository: &dyn JobRepository,
        mut job_execution: JobExecution,
        start: &str,
        completed: HashMap<String, ExitStatus>,
    ) -> JobResult<JobExecution> {
        self.stop_handle.reset();

        job_execution.status = BatchStatus::Started;
        job_execution.start_time = Some(Utc::now());

        let walked = repository
            .update_job_execution(&job_execution)
            .and_then(|()| {
                info!(
                    "Start of job: {}, id: {}, execution: {}",
                    self.name, self.id, job_execution.id
                );
                self.walk(repository, &mut job_execution, start, &completed)
            });
        let (status, exit_status) = match walked {
            Ok(end) => end,
            Err(error) => return Err(self.abandon(repository, job_execution, error)),
        };

        job_execution.status = status;
        job_execution.exit_status = exit_status;
        job_execution.end_time = Some(Utc::now());
        if let Err(error) = repository.update_job_execution(&job_execution) {
            return Err(self.abandon(repository, job_execution, error));
        }

        match job_execution.status {
            BatchStatus::Failed => {
                if let Some(report) = job_execution.failure_report() {
                    error!("{}", report);
                }
            }
            BatchStatus::Stopped => warn!(
                "Job {} (execution {}) stopped, restart node: {:?}",
                self.name, job_execution.id, job_execution.restart_node
            ),
            _ => {}
        }

        info!(
            "End of job: {}, id: {}, execution: {}, status: {:?}",
            self.name, self.id, job_execution.id, job_execution.status
        );

        Ok(job_execution)
    }

    /// Walks the flow from `start` until an end state is reached.
    fn walk(
        &self,
        repository: &dyn JobRepository,
        job_execution: &mut JobExecution,
        start: &str,
        completed: &HashMap<String, ExitStatus>,
    ) -> Result<(BatchStatus, ExitStatus), BatchError> {
        let mut current = start.to_string();
        let end = loop {
            if self.stop_handle.is_stop_requested() {
                warn!("Job {} stopped before node {}", self.name, current);
                break (BatchStatus::Stopped, ExitStatus::stopped());
            }

            let node = self.flow.get_node(&current).ok_or_else(|| BatchError::MalformedFlow {
                node: current.clone(),
                reason: "node is not declared".to_string(),
            })?;

            let (node_exit_status, failure_kind) = match node {
                FlowNode::Step(step) => match completed.get(&current) {
                    Some(exit_status) => {
                        info!(
                            "Step {} already completed for this job instance, reusing exit status {}",
                            current, exit_status
                        );
                        (exit_status.clone(), None)
                    }
                    None => {
                        let (step_execution, outcome) = self.run_step(step, job_execution);
                        repository.append_step_execution(job_execution.id, &step_execution)?;

                        let stopped = step_execution.status == BatchStatus::Stopped;
                        let exit_status = step_execution.exit_status.clone();
                        job_execution.step_executions.push(step_execution);

                        if stopped {
                            warn!("Job {} stopped during step {}", self.name, current);
                            break (BatchStatus::Stopped, ExitStatus::stopped());
                        }

                        let kind = match outcome {
                            StepOutcome::Failure { kind, .. } => Some(kind),
                            StepOutcome::Success(_) => None,
                        };
                        (exit_status, kind)
                    }
                },
                FlowNode::Decider(decider) => {
                    let mut step_execution = StepExecution::new(&current, job_execution.id);
                    step_execution.start_time = Some(Utc::now());
                    let decision = decider.decide(job_execution);
                    step_execution.end_time = Some(Utc::now());

                    match decision {
                        Ok(exit_status) => {
                            debug!("Decider {} returned {}", current, exit_status);
                            step_execution.status = BatchStatus::Completed;
                            step_execution.exit_status = exit_status.clone();
                            repository.append_step_execution(job_execution.id, &step_execution)?;
                            job_execution.step_executions.push(step_execution);
                            (exit_status, None)
                        }
                        Err(error) => {
                            error!("Decider {} failed: {}", current, error);
                            step_execution.status = BatchStatus::Failed;
                            step_execution.exit_status =
                                ExitStatus::failed().with_description(error.to_string());
                            repository.append_step_execution(job_execution.id, &step_execution)?;
                            job_execution.step_executions.push(step_execution);
                            job_execution.failure = Some(JobFailure::Decider {
                                node: current.clone(),
                                detail: error.to_string(),
                            });
                            break (
                                BatchStatus::Failed,
                                ExitStatus::failed().with_description(error.to_string()),
                            );
                        }
                    }
                }
            };

            match self.flow.resolve_next(&current, &node_exit_status) {
                Ok(Next::Node(next)) => {
                    debug!("Transition from {} on {} to {}", current, node_exit_status, next);
                    current = next.to_string();
                }
                Ok(Next::End(end_state)) => {
                    debug!("Transition from {} on {} to {:?} end", current, node_exit_status, end_state);
                    match end_state {
                        EndState::Failed => {
                            job_execution.failure = Some(JobFailure::Step {
                                step_name: current.clone(),
                                kind: failure_kind,
                                exit_status: node_exit_status,
                            });
                        }
                        EndState::Stopped => job_execution.restart_node = Some(current.clone()),
                        EndState::Completed => {}
                    }
                    break (end_state.batch_status(), end_state.exit_status());
                }
                Ok(Next::StopAndRestart(restart)) => {
                    debug!("Transition from {} on {} stops, restart at {}", current, node_exit_status, restart);
                    job_execution.restart_node = Some(restart.to_string());
                    break (BatchStatus::Stopped, ExitStatus::stopped());
                }
                Err(error) => {
                    error!("{}", error);
                    job_execution.failure = Some(JobFailure::UnresolvedTransition {
                        node: current.clone(),
                        exit_code: node_exit_status.code().to_string(),
                    });
                    break (
                        BatchStatus::Failed,
                        ExitStatus::failed().with_description(error.to_string()),
                    );
                }
            }
        };

        Ok(end)
    }

    /// Marks `job_execution` as FAILED after `error` interrupted it, so that it can be restarted.
    fn abandon(&self, repository: &dyn JobRepository, mut job_execution: JobExecution, error: BatchError) -> BatchError {
        error!(
            "Job {} (execution {}) interrupted: {}",
            self.name, job_execution.id, error
        );

        job_execution.status = BatchStatus::Failed;
        job_execution.exit_status = ExitStatus::failed().with_description(error.to_string());
        job_execution.end_time = Some(Utc::now());
        if let Err(update_error) = repository.update_job_execution(&job_execution) {
            error!(
                "Could not mark job execution {} as failed: {}",
                job_execution.id, update_error
            );
        }

        error
    }

    fn run_step(&self, step: &dyn Step, job_execution: &JobExecution) -> (StepExecution, StepOutcome) {
        let mut step_execution = StepExecution::new(step.get_name(), job_execution.id);
        let context = StepContext::new(&self.name, &job_execution.parameters, &self.stop_handle);

        let outcome = step.execute(&mut step_execution, &context);
        if let StepOutcome::Failure { kind, detail } = &outcome {
            error!("Step {} failed ({:?}): {}", step.get_name(), kind, detail);
        }

        (step_execution, outcome)
    }
}

/// Builder for creating a job instance.
///
/// A job is either a sequence of steps declared with [`start`](JobBuilder::start)
/// and [`next`](JobBuilder::next), where any step that does not complete fails
/// the job, or an explicit [`Flow`] set with [`flow`](JobBuilder::flow).
///
/// # Example
///
/// ```rust
/// use spring_batch_flow::core::job::{Job, JobBuilder};
/// use spring_batch_flow::core::parameters::JobParameters;
/// use spring_batch_flow::core::repository::InMemoryJobRepository;
/// use spring_batch_flow::core::status::BatchStatus;
/// use spring_batch_flow::core::step::{StepBuilder, StepExecution};
/// use spring_batch_flow::core::tasklet::RepeatStatus;
/// use spring_batch_flow::BatchError;
///
/// let noop = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
///     Ok(RepeatStatus::Finished)
/// };
/// let extract = StepBuilder::new("extract").tasklet(&noop).build()?;
/// let load = StepBuilder::new("load").tasklet(&noop).build()?;
///
/// let job = JobBuilder::new()
///     .name("import-customers".to_string())
///     .start(&extract)
///     .next(&load)
///     .build()?;
///
/// let repository = InMemoryJobRepository::new();
/// let job_execution = job.run(&repository, JobParameters::new())?;
/// assert_eq!(job_execution.status, BatchStatus::Completed);
/// # Ok::<(), BatchError>(())
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    /// Steps run in order when no flow is given
    steps: Vec<&'a dyn Step>,
    flow: Option<Flow<'a>>,
    validator: Option<JobParametersValidator>,
    incrementer: Option<&'a dyn JobParametersIncrementer>,
    stop_handle: Option<StopHandle>,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: String) -> JobBuilder<'a> {
        self.name = Some(name);
        self
    }

    /// Sets the first step of a sequential job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step to a sequential job; it runs when the previous one completed.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    pub fn flow(mut self, flow: Flow<'a>) -> JobBuilder<'a> {
        self.flow = Some(flow);
        self
    }

    pub fn validator(mut self, validator: JobParametersValidator) -> JobBuilder<'a> {
        self.validator = Some(validator);
        self
    }

    pub fn incrementer(mut self, incrementer: &'a dyn JobParametersIncrementer) -> JobBuilder<'a> {
        self.incrementer = Some(incrementer);
        self
    }

    /// Shares `stop_handle` with the job instead of creating a new one.
    pub fn stop_handle(mut self, stop_handle: StopHandle) -> JobBuilder<'a> {
        self.stop_handle = Some(stop_handle);
        self
    }

    /// Builds the job.
    ///
    /// If no name has been provided, a random name is generated.
    ///
    /// # Errors
    /// - `BatchError::Configuration` when the job has no step, or both steps and a flow
    /// - `BatchError::MalformedFlow` when the sequence of steps is not a valid flow
    pub fn build(self) -> Result<JobInstance<'a>, BatchError> {
        let name = self.name.unwrap_or_else(build_name);

        let flow = match (self.flow, self.steps.as_slice()) {
            (Some(_), [_, ..]) => {
                return Err(BatchError::Configuration(format!(
                    "job {} declares both a flow and a sequence of steps",
                    name
                )));
            }
            (Some(flow), []) => flow,
            (None, []) => {
                return Err(BatchError::Configuration(format!("job {} has no step", name)));
            }
            (None, [first, rest @ ..]) => {
                let mut builder = FlowBuilder::new().start(*first);
                let mut previous = first.get_name();
                for step in rest {
                    builder = builder.step(*step).next(previous, step.get_name());
                    previous = step.get_name();
                }
                builder.end(previous).build()?
            }
        };

        Ok(JobInstance {
            id: Uuid::new_v4(),
            name,
            flow,
            validator: self.validator,
            incrementer: self.incrementer,
            stop_handle: self.stop_handle.unwrap_or_default(),
        })
    }
}
