//! Fault tolerance policies for chunk oriented steps.
//!
//! A failure raised by a collaborator is classified as one of [`FailureKind`]:
//!
//! - `Retryable`: the whole chunk is rolled back and attempted again, up to the retry limit
//! - `Skippable`: the offending item is dropped, up to the skip limit
//! - `Fatal`: the step fails immediately
//!
//! Retry and skip counters are independent: skipping an item never consumes a
//! retry attempt, and retrying a chunk never counts as a skip.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::BatchError;

/// How a chunk oriented step reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Skippable,
    Fatal,
}

type ClassifierFn = dyn Fn(&BatchError) -> FailureKind + Send + Sync;

/// Maps errors to a [`FailureKind`].
///
/// Timeouts and optimistic lock conflicts are retryable. Reader, processor,
/// writer and validation errors are skippable. Everything else is fatal.
/// A custom classifier replaces these defaults entirely.
pub struct FailureClassifier {
    custom: Option<Box<ClassifierFn>>,
}

impl FailureClassifier {
    pub fn new() -> Self {
        Self { custom: None }
    }

    pub fn custom(classifier: impl Fn(&BatchError) -> FailureKind + Send + Sync + 'static) -> Self {
        Self {
            custom: Some(Box::new(classifier)),
        }
    }

    pub fn classify(&self, error: &BatchError) -> FailureKind {
        match &self.custom {
            Some(classifier) => classifier(error),
            None => Self::default_kind(error),
        }
    }

    fn default_kind(error: &BatchError) -> FailureKind {
        match error {
            BatchError::Timeout(_) | BatchError::OptimisticLock(_) => FailureKind::Retryable,
            BatchError::ItemReader(_)
            | BatchError::ItemProcessor(_)
            | BatchError::ItemWriter(_)
            | BatchError::Validation(_) => FailureKind::Skippable,
            _ => FailureKind::Fatal,
        }
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt bookkeeping for one chunk.
#[derive(Debug)]
pub struct RetryContext {
    retry_limit: usize,
    attempt: usize,
    last_failure: Option<String>,
}

impl RetryContext {
    pub fn new(retry_limit: usize) -> Self {
        Self {
            retry_limit,
            attempt: 0,
            last_failure: None,
        }
    }

    /// Starts a new attempt and returns its number, starting at 1.
    pub fn start_attempt(&mut self) -> usize {
        self.attempt += 1;
        self.attempt
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Records a retryable failure and tells whether another attempt is allowed.
    ///
    /// A chunk gets at most `retry_limit + 1` attempts.
    pub fn register_failure(&mut self, error: &BatchError) -> bool {
        self.last_failure = Some(error.to_string());
        self.attempt <= self.retry_limit
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }
}

/// Skip budget of a step, shared by all its chunk workers.
///
/// A limit of 0 disables skipping.
#[derive(Debug)]
pub struct SkipPolicy {
    skip_limit: usize,
    skipped: AtomicUsize,
}

impl SkipPolicy {
    pub fn new(skip_limit: usize) -> Self {
        Self {
            skip_limit,
            skipped: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.skip_limit > 0
    }

    /// Claims one skip from the budget. Returns `false` once the limit is exceeded.
    pub fn try_skip(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.skipped.fetch_add(1, Ordering::SeqCst) < self.skip_limit
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst).min(self.skip_limit)
    }
}
