use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    /// An item did not pass validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A collaborator did not answer in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A concurrent update was detected by a collaborator.
    #[error("Optimistic lock conflict: {0}")]
    OptimisticLock(String),

    #[error("Tasklet error: {0}")]
    Tasklet(String),

    #[error("Decider error: {0}")]
    Decider(String),

    /// The flow definition is invalid, detected when the flow is built.
    #[error("Malformed flow at node '{node}': {reason}")]
    MalformedFlow { node: String, reason: String },

    /// No transition rule matched the exit status produced by a node.
    #[error("No transition from node '{node}' matches exit code '{exit_code}'")]
    UnresolvedTransition { node: String, exit_code: String },

    #[error("Invalid job parameters: {0}")]
    InvalidJobParameters(String),

    #[error("Job execution {0} not found")]
    JobExecutionNotFound(u64),

    #[error("Job execution {0} is already complete")]
    JobAlreadyComplete(u64),

    #[error("Job repository: {0}")]
    Repository(String),

    #[error("Configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
