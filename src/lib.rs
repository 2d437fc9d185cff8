#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Spring-Batch flows for Rust

 Conditional step flows, deciders and fault tolerant chunk processing for
 batch applications, in the spirit of Java Spring Batch.

 ## Core Concepts

- **Job:** A named, parameterized batch process. A `Job` walks a `Flow` and records every run in a `JobRepository`.
- **Flow:** A directed graph of nodes (steps and deciders) connected by transition rules. Each rule maps an exit status pattern of a node to the next node or to an end state (COMPLETED, FAILED, STOPPED).
- **Step:** A unit of work. A chunk oriented step reads, processes and writes items in chunks; a tasklet step runs a single task.
- **Decider:** A node that only computes an exit status from the running job execution, used to branch the flow.
- **ItemReader / ItemProcessor / ItemWriter:** The collaborators of a chunk oriented step. A processor filters an item by returning `Ok(None)`.
- **Skip and retry:** A chunk oriented step retries a chunk whose failure is retryable and skips items whose failure is skippable, within configurable limits.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| json          | Enables a job repository persisted as a JSON file             |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```rust
# use spring_batch_flow::{
#     core::{
#         decider::JobExecutionDecider,
#         flow::{EndState, FlowBuilder},
#         item::{ItemProcessor, ItemProcessorResult},
#         job::{Job, JobBuilder, JobExecution},
#         parameters::JobParametersBuilder,
#         repository::InMemoryJobRepository,
#         status::{BatchStatus, ExitStatus},
#         step::StepBuilder,
#     },
#     item::memory::{InMemoryItemWriter, IteratorItemReader},
#     BatchError,
# };
struct TrimThorns;

impl ItemProcessor<String, String> for TrimThorns {
    fn process(&self, flower: &String) -> ItemProcessorResult<String> {
        Ok(Some(flower.replace(" with thorns", "")))
    }
}

fn main() -> Result<(), BatchError> {
    let reader = IteratorItemReader::new(vec!["rose with thorns".to_string()]);
    let writer = InMemoryItemWriter::new();
    let processor = TrimThorns;

    let select = StepBuilder::new("select")
        .chunk::<String, String>(10)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build_with_processor()?;

    let needs_trim = |job_execution: &JobExecution| -> Result<ExitStatus, BatchError> {
        match job_execution.parameters.get_string("type") {
            Some("roses") => Ok(ExitStatus::new("TRIM_REQUIRED")),
            _ => Ok(ExitStatus::new("NO_TRIM_REQUIRED")),
        }
    };

    let flow = FlowBuilder::new()
        .start(&select)
        .decider("needs-trim", &needs_trim)
        .rule("select", "COMPLETED", "needs-trim")
        .rule("select", "*", EndState::Failed)
        .rule("needs-trim", "*", EndState::Completed)
        .build()?;

    let job = JobBuilder::new().name("flowers".to_string()).flow(flow).build()?;
    let parameters = JobParametersBuilder::new().add_string("type", "roses").build();

    let job_execution = job.run(&InMemoryJobRepository::new(), parameters)?;

    assert_eq!(job_execution.status, BatchStatus::Completed);
    assert_eq!(writer.get_items(), vec!["rose".to_string()]);

    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of items readers / writers
pub mod item;
