use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    build_name,
    chunk::ChunkOrientedStepBuilder,
    parameters::JobParameters,
    status::{BatchStatus, ExitStatus},
    tasklet::{Tasklet, TaskletStepBuilder},
};

/// Execution record of one node visited during a job execution.
///
/// Counters are accumulated chunk by chunk; once the node finishes the record
/// is appended to the job repository and never modified again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Name of the node that produced this execution
    pub name: String,
    /// Identifier of the owning job execution
    pub job_execution_id: u64,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Number of items successfully read
    pub read_count: usize,
    /// Number of items successfully written
    pub write_count: usize,
    /// Number of items dropped by the processor
    pub filter_count: usize,
    /// Number of read failures skipped
    pub read_skip_count: usize,
    /// Number of items skipped because processing failed
    pub process_skip_count: usize,
    /// Number of items skipped because writing failed
    pub write_skip_count: usize,
    /// Number of chunk attempts that were retried
    pub retry_count: usize,
    /// Number of committed chunks
    pub commit_count: usize,
    /// Number of rolled back chunk attempts
    pub rollback_count: usize,
}

impl StepExecution {
    pub fn new(name: &str, job_execution_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            job_execution_id,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            start_time: None,
            end_time: None,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            retry_count: 0,
            commit_count: 0,
            rollback_count: 0,
        }
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Adds the counters of one chunk to this execution.
    pub fn apply(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.write_skip_count += contribution.write_skip_count;
        self.retry_count += contribution.retry_count;
        self.commit_count += contribution.commit_count;
        self.rollback_count += contribution.rollback_count;
    }
}

impl fmt::Display for StepExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step={}, status={:?}, exit={}, read={}, write={}, filter={}, skip={}, retry={}, commit={}, rollback={}",
            self.name,
            self.status,
            self.exit_status,
            self.read_count,
            self.write_count,
            self.filter_count,
            self.skip_count(),
            self.retry_count,
            self.commit_count,
            self.rollback_count
        )
    }
}

/// Counters collected while a single chunk is processed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StepContribution {
    pub read_count: usize,
    pub write_count: usize,
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    pub retry_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
}

/// Reason a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A chunk kept failing with a retryable error after every allowed attempt.
    RetryLimitExceeded,
    /// More items failed than the skip limit allows.
    SkipLimitExceeded,
    /// A failure that is neither retryable nor skippable.
    Fatal,
    /// The tasklet of a tasklet step failed.
    Tasklet,
    /// A decider failed to compute an exit status.
    Decider,
}

/// Result of invoking a node.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success(ExitStatus),
    Failure { kind: ErrorKind, detail: String },
}

impl StepOutcome {
    pub fn failure(kind: ErrorKind, detail: impl fmt::Display) -> Self {
        StepOutcome::Failure {
            kind,
            detail: detail.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success(_))
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self {
            StepOutcome::Success(exit_status) => exit_status.clone(),
            StepOutcome::Failure { detail, .. } => ExitStatus::failed().with_description(detail),
        }
    }

    fn batch_status(&self) -> BatchStatus {
        match self {
            StepOutcome::Success(exit_status) if exit_status.is_stopped() => BatchStatus::Stopped,
            StepOutcome::Success(_) => BatchStatus::Completed,
            StepOutcome::Failure { .. } => BatchStatus::Failed,
        }
    }
}

/// Request to stop a running job after the chunk in progress.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// What a step sees of the job it runs in.
pub struct StepContext<'a> {
    pub job_name: &'a str,
    pub parameters: &'a JobParameters,
    stop_handle: &'a StopHandle,
}

impl<'a> StepContext<'a> {
    pub fn new(job_name: &'a str, parameters: &'a JobParameters, stop_handle: &'a StopHandle) -> Self {
        Self {
            job_name,
            parameters,
            stop_handle,
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_handle.is_stop_requested()
    }
}

/// Callbacks around the execution of a step.
///
/// `after_step` may return an exit status that replaces the one produced by
/// the step, which lets a step pick its own outgoing transition.
pub trait StepExecutionListener: Sync {
    fn before_step(&self, _step_execution: &StepExecution) {}

    fn after_step(
        &self,
        _step_execution: &StepExecution,
        _parameters: &JobParameters,
    ) -> Option<ExitStatus> {
        None
    }
}

/// A unit of work in a flow.
pub trait Step: Sync {
    fn get_name(&self) -> &str;

    /// Runs the step, accumulating counters into `step_execution`.
    ///
    /// Status, exit status and timestamps of `step_execution` are set from the
    /// returned outcome.
    fn execute(&self, step_execution: &mut StepExecution, context: &StepContext) -> StepOutcome;
}

/// Runs `body` between the listener callbacks and records the outcome on the execution.
pub(crate) fn execute_with_listeners(
    listeners: &[&dyn StepExecutionListener],
    step_execution: &mut StepExecution,
    context: &StepContext,
    body: impl FnOnce(&mut StepExecution) -> StepOutcome,
) -> StepOutcome {
    step_execution.status = BatchStatus::Started;
    step_execution.start_time = Some(Utc::now());

    info!(
        "Start of step: {}, id: {}",
        step_execution.name, step_execution.id
    );

    for listener in listeners {
        listener.before_step(step_execution);
    }

    let outcome = body(step_execution);
    step_execution.status = outcome.batch_status();
    step_execution.exit_status = outcome.exit_status();

    for listener in listeners.iter().rev() {
        if let Some(exit_status) = listener.after_step(step_execution, context.parameters) {
            step_execution.exit_status = exit_status;
        }
    }

    step_execution.end_time = Some(Utc::now());

    info!("End of step: {}", step_execution);

    outcome
}

/// Entry point for building steps.
///
/// # Example
///
/// ```rust
/// use spring_batch_flow::core::step::StepBuilder;
/// use spring_batch_flow::core::tasklet::RepeatStatus;
/// use spring_batch_flow::core::step::StepExecution;
/// use spring_batch_flow::core::parameters::JobParameters;
/// use spring_batch_flow::BatchError;
///
/// let tasklet = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
///     Ok(RepeatStatus::Finished)
/// };
///
/// let step = StepBuilder::new("prepare").tasklet(&tasklet).build()?;
/// # Ok::<(), BatchError>(())
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Builder for a step with a generated name.
    pub fn unnamed() -> Self {
        Self::new(&build_name())
    }

    pub fn tasklet<'a>(self, tasklet: &'a dyn Tasklet) -> TaskletStepBuilder<'a> {
        TaskletStepBuilder::new(&self.name).tasklet(tasklet)
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}
