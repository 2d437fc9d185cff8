use crate::BatchError;

use super::{job::JobExecution, status::ExitStatus};

/// Node of a flow that only computes a branch.
///
/// A decider gets a read-only view of the running job execution: its
/// parameters and the steps already executed. It must not have side effects.
/// An error returned here fails the job and is never retried.
///
/// # Example
///
/// ```rust
/// use spring_batch_flow::core::{decider::JobExecutionDecider, job::JobExecution, status::ExitStatus};
/// use spring_batch_flow::BatchError;
///
/// struct FlowerTypeDecider;
///
/// impl JobExecutionDecider for FlowerTypeDecider {
///     fn decide(&self, job_execution: &JobExecution) -> Result<ExitStatus, BatchError> {
///         match job_execution.parameters.get_string("type") {
///             Some(flower) if flower.eq_ignore_ascii_case("roses") => Ok(ExitStatus::new("TRIM_REQUIRED")),
///             _ => Ok(ExitStatus::new("NO_TRIM_REQUIRED")),
///         }
///     }
/// }
/// ```
pub trait JobExecutionDecider: Sync {
    fn decide(&self, job_execution: &JobExecution) -> Result<ExitStatus, BatchError>;
}

impl<F> JobExecutionDecider for F
where
    F: Fn(&JobExecution) -> Result<ExitStatus, BatchError> + Sync,
{
    fn decide(&self, job_execution: &JobExecution) -> Result<ExitStatus, BatchError> {
        self(job_execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{parameters::JobParametersBuilder, status::BatchStatus};

    #[test]
    fn closure_decider_reads_previous_steps() {
        let decider = |job_execution: &JobExecution| -> Result<ExitStatus, BatchError> {
            let skipped: usize = job_execution
                .step_executions
                .iter()
                .map(|step_execution| step_execution.skip_count())
                .sum();
            Ok(if skipped > 0 {
                ExitStatus::new("REVIEW")
            } else {
                ExitStatus::completed()
            })
        };

        let parameters = JobParametersBuilder::new().build();
        let job_execution = JobExecution::new(7, "import", parameters);

        let exit_status = decider.decide(&job_execution).unwrap();

        assert!(exit_status.is_completed());
        assert_eq!(job_execution.status, BatchStatus::Starting);
    }
}
