use log::{debug, error};

use crate::BatchError;

use super::{
    parameters::JobParameters,
    status::ExitStatus,
    step::{
        ErrorKind, Step, StepContext, StepContribution, StepExecution, StepExecutionListener,
        StepOutcome, execute_with_listeners,
    },
};

/// Whether a tasklet wants to be called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet can continue to execute.
    Continuable,
    /// The tasklet has finished executing.
    Finished,
}

/// A single task run by a [`TaskletStep`].
///
/// Any error returned here fails the step; tasklets are never retried.
pub trait Tasklet: Sync {
    fn execute(
        &self,
        step_execution: &StepExecution,
        parameters: &JobParameters,
    ) -> Result<RepeatStatus, BatchError>;
}

impl<F> Tasklet for F
where
    F: Fn(&StepExecution, &JobParameters) -> Result<RepeatStatus, BatchError> + Sync,
{
    fn execute(
        &self,
        step_execution: &StepExecution,
        parameters: &JobParameters,
    ) -> Result<RepeatStatus, BatchError> {
        self(step_execution, parameters)
    }
}

/// Step that calls its tasklet until it reports [`RepeatStatus::Finished`].
///
/// Each call counts as one commit. A stop request is honoured between calls.
/// A step whose tasklet is still `Continuable` after `repeat_limit` calls fails.
pub struct TaskletStep<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    listeners: Vec<&'a dyn StepExecutionListener>,
    repeat_limit: usize,
}

impl Step for TaskletStep<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution, context: &StepContext) -> StepOutcome {
        execute_with_listeners(&self.listeners, step_execution, context, |step_execution| {
            for _ in 0..self.repeat_limit {
                if context.is_stop_requested() {
                    return StepOutcome::Success(ExitStatus::stopped());
                }

                match self.tasklet.execute(step_execution, context.parameters) {
                    Ok(repeat_status) => {
                        step_execution.apply(&StepContribution {
                            commit_count: 1,
                            ..Default::default()
                        });
                        debug!("Tasklet of {} returned {:?}", self.name, repeat_status);
                        if repeat_status == RepeatStatus::Finished {
                            return StepOutcome::Success(ExitStatus::completed());
                        }
                    }
                    Err(error) => {
                        error!("Tasklet of {} failed: {}", self.name, error);
                        return StepOutcome::failure(ErrorKind::Tasklet, error);
                    }
                }
            }

            error!(
                "Tasklet of {} still continuable after {} calls",
                self.name, self.repeat_limit
            );
            StepOutcome::failure(
                ErrorKind::Tasklet,
                format!("tasklet did not finish within {} calls", self.repeat_limit),
            )
        })
    }
}

const DEFAULT_REPEAT_LIMIT: usize = 1000;

pub struct TaskletStepBuilder<'a> {
    name: String,
    tasklet: Option<&'a dyn Tasklet>,
    listeners: Vec<&'a dyn StepExecutionListener>,
    repeat_limit: usize,
}

impl<'a> TaskletStepBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasklet: None,
            listeners: Vec::new(),
            repeat_limit: DEFAULT_REPEAT_LIMIT,
        }
    }

    pub fn tasklet(mut self, tasklet: &'a dyn Tasklet) -> Self {
        self.tasklet = Some(tasklet);
        self
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Maximum number of calls to the tasklet, 1000 by default.
    pub fn repeat_limit(mut self, repeat_limit: usize) -> Self {
        self.repeat_limit = repeat_limit;
        self
    }

    pub fn build(self) -> Result<TaskletStep<'a>, BatchError> {
        if self.repeat_limit == 0 {
            return Err(BatchError::Configuration(format!(
                "step {} must allow at least one tasklet call",
                self.name
            )));
        }

        let tasklet = self.tasklet.ok_or_else(|| {
            BatchError::Configuration(format!("step {} has no tasklet", self.name))
        })?;

        Ok(TaskletStep {
            name: self.name,
            tasklet,
            listeners: self.listeners,
            repeat_limit: self.repeat_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::{status::BatchStatus, step::StopHandle};

    struct CountingTasklet {
        calls: AtomicUsize,
        until: usize,
    }

    impl Tasklet for CountingTasklet {
        fn execute(&self, _: &StepExecution, _: &JobParameters) -> Result<RepeatStatus, BatchError> {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if calls < self.until {
                Ok(RepeatStatus::Continuable)
            } else {
                Ok(RepeatStatus::Finished)
            }
        }
    }

    fn run(step: &TaskletStep, stop_handle: &StopHandle) -> (StepOutcome, StepExecution) {
        let parameters = JobParameters::new();
        let context = StepContext::new("job", &parameters, stop_handle);
        let mut step_execution = StepExecution::new(step.get_name(), 1);
        let outcome = step.execute(&mut step_execution, &context);
        (outcome, step_execution)
    }

    #[test]
    fn tasklet_repeats_until_finished() {
        let tasklet = CountingTasklet {
            calls: AtomicUsize::new(0),
            until: 3,
        };
        let step = TaskletStepBuilder::new("repeat").tasklet(&tasklet).build().unwrap();

        let (outcome, step_execution) = run(&step, &StopHandle::new());

        assert!(outcome.is_success());
        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.commit_count, 3);
    }

    #[test]
    fn tasklet_error_fails_step() {
        let tasklet = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
            Err(BatchError::Tasklet("archive missing".to_string()))
        };
        let step = TaskletStepBuilder::new("archive").tasklet(&tasklet).build().unwrap();

        let (outcome, step_execution) = run(&step, &StopHandle::new());

        assert!(matches!(
            outcome,
            StepOutcome::Failure {
                kind: ErrorKind::Tasklet,
                ..
            }
        ));
        assert_eq!(step_execution.status, BatchStatus::Failed);
        assert!(step_execution.exit_status.is_failed());
    }

    #[test]
    fn tasklet_exceeding_repeat_limit_fails() {
        let tasklet = CountingTasklet {
            calls: AtomicUsize::new(0),
            until: usize::MAX,
        };
        let step = TaskletStepBuilder::new("endless")
            .tasklet(&tasklet)
            .repeat_limit(5)
            .build()
            .unwrap();

        let (outcome, step_execution) = run(&step, &StopHandle::new());

        assert!(!outcome.is_success());
        assert_eq!(step_execution.status, BatchStatus::Failed);
        assert_eq!(step_execution.commit_count, 5);
        assert_eq!(tasklet.calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn stop_request_stops_tasklet_step() {
        let tasklet = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
            Ok(RepeatStatus::Continuable)
        };
        let step = TaskletStepBuilder::new("endless").tasklet(&tasklet).build().unwrap();
        let stop_handle = StopHandle::new();
        stop_handle.stop();

        let (_, step_execution) = run(&step, &stop_handle);

        assert_eq!(step_execution.status, BatchStatus::Stopped);
        assert!(step_execution.exit_status.is_stopped());
        assert_eq!(step_execution.commit_count, 0);
    }
}
