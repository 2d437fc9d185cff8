//! Mock versions of the step collaborators.
use mockall::mock;

use spring_batch_flow::{
    BatchError,
    core::{decider::JobExecutionDecider, item::ItemWriter, job::JobExecution, status::ExitStatus},
};

mock! {
    pub Writer {}
    impl ItemWriter<usize> for Writer {
        fn write(&self, items: &[usize]) -> Result<(), BatchError>;
    }
}

mock! {
    pub Decider {}
    impl JobExecutionDecider for Decider {
        fn decide(&self, job_execution: &JobExecution) -> Result<ExitStatus, BatchError>;
    }
}
