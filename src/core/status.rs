use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job or step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Status of an execution prior to running.
    Starting,
    /// Status of an execution that is running.
    Started,
    /// The execution has successfully completed.
    Completed,
    /// The execution has been stopped by request and can be resumed.
    Stopped,
    /// The execution has failed.
    Failed,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }

    /// `true` for the statuses a restart resumes from.
    pub fn is_restartable(&self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Stopped)
    }
}

/// Signal produced by every node of a flow, matched against the node's
/// transition rules to select what runs next.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitStatus {
    code: String,
    description: String,
}

impl ExitStatus {
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";
    pub const NOOP: &'static str = "NOOP";
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: String::new(),
        }
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_completed(&self) -> bool {
        self.code == Self::COMPLETED
    }

    pub fn is_failed(&self) -> bool {
        self.code == Self::FAILED
    }

    pub fn is_stopped(&self) -> bool {
        self.code == Self::STOPPED
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.description)
        }
    }
}
