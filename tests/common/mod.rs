#![allow(dead_code)]

mod mocks;

pub use mocks::{MockDecider, MockWriter};

use std::sync::atomic::{AtomicUsize, Ordering};

use spring_batch_flow::{
    BatchError,
    core::{
        item::{ItemProcessor, ItemProcessorResult, ItemReader, ItemReaderResult},
        parameters::JobParameters,
        step::{Step, StepContext, StepExecution, StepOutcome, StopHandle},
    },
};

/// Initializes `env_logger` once for the whole test binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Reads `1..=end`.
pub struct RangeReader {
    next: AtomicUsize,
    end: usize,
}

impl RangeReader {
    pub fn new(end: usize) -> Self {
        Self {
            next: AtomicUsize::new(1),
            end,
        }
    }
}

impl ItemReader<usize> for RangeReader {
    fn read(&self) -> ItemReaderResult<usize> {
        let value = self.next.fetch_add(1, Ordering::SeqCst);
        Ok((value <= self.end).then_some(value))
    }
}

/// Rejects every item that is a multiple of `divisor` with a validation error.
pub struct RejectMultiples {
    pub divisor: usize,
}

impl ItemProcessor<usize, usize> for RejectMultiples {
    fn process(&self, item: &usize) -> ItemProcessorResult<usize> {
        if item % self.divisor == 0 {
            Err(BatchError::Validation(format!("{} is rejected", item)))
        } else {
            Ok(Some(*item))
        }
    }
}

/// Runs a step outside of any job.
pub fn execute_step(step: &dyn Step) -> (StepOutcome, StepExecution) {
    let parameters = JobParameters::new();
    let stop_handle = StopHandle::new();
    let context = StepContext::new("test", &parameters, &stop_handle);
    let mut step_execution = StepExecution::new(step.get_name(), 1);
    let outcome = step.execute(&mut step_execution, &context);
    (outcome, step_execution)
}
