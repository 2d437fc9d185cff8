use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::BatchError;

use super::{
    item::{ItemProcessor, ItemReader, ItemWriter, PassThroughProcessor},
    retry::{FailureClassifier, FailureKind, RetryContext, SkipPolicy},
    status::ExitStatus,
    step::{
        ErrorKind, Step, StepContext, StepContribution, StepExecution, StepExecutionListener,
        StepOutcome, execute_with_listeners,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// More items may be added.
    Continuable,
    /// The chunk reached its size.
    Full,
    /// The reader is exhausted; the chunk may be partial or empty.
    Finished,
}

/// Items read for one commit unit.
pub struct Chunk<T> {
    items: Vec<T>,
    status: ChunkStatus,
    chunk_size: usize,
}

impl<T> Chunk<T> {
    pub fn new(chunk_size: usize) -> Chunk<T> {
        Chunk {
            items: Vec::with_capacity(chunk_size),
            status: ChunkStatus::Continuable,
            chunk_size,
        }
    }

    pub fn add_item(&mut self, item: T) {
        self.items.push(item);
        if self.items.len() >= self.chunk_size {
            self.status = ChunkStatus::Full;
        }
    }

    pub fn finish(&mut self) {
        self.status = ChunkStatus::Finished;
    }

    /// Drops an item that was skipped; it is not seen again on retry.
    pub fn remove(&mut self, index: usize) -> T {
        self.items.remove(index)
    }

    pub fn get_items(&self) -> &[T] {
        &self.items
    }

    pub fn get_status(&self) -> ChunkStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Failure that ends a chunk worker.
#[derive(Debug)]
struct ChunkFailure {
    kind: ErrorKind,
    detail: String,
}

impl ChunkFailure {
    fn new(kind: ErrorKind, error: &BatchError) -> Self {
        Self {
            kind,
            detail: error.to_string(),
        }
    }
}

/// Why a single attempt at a chunk did not commit.
enum AttemptError {
    Retryable(BatchError),
    Fatal(ChunkFailure),
}

/// How a chunk worker left its loop.
#[derive(Debug, PartialEq)]
enum WorkerEnd {
    Exhausted,
    Stopped,
    Halted,
}

/// State shared by the chunk workers of one step execution.
struct ChunkWorkers<'s> {
    read_lock: Mutex<()>,
    exhausted: AtomicBool,
    halted: AtomicBool,
    skip_policy: SkipPolicy,
    step_execution: Mutex<&'s mut StepExecution>,
}

impl ChunkWorkers<'_> {
    fn apply(&self, contribution: &StepContribution) {
        self.step_execution.lock().apply(contribution);
    }
}

/// Step that reads, processes and writes items chunk by chunk.
///
/// Each chunk is a commit unit: it is written as one batch, and a failed
/// attempt is rolled back and retried from scratch. With more than one worker,
/// chunks are processed concurrently; reads stay serialized so every chunk is a
/// contiguous run of the reader, but chunks may commit in any order.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a dyn ItemProcessor<I, O>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<O>,
    listeners: Vec<&'a dyn StepExecutionListener>,
    /// Number of items to process in each chunk
    chunk_size: usize,
    /// Maximum number of items skipped before failing the step, 0 disables skipping
    skip_limit: usize,
    /// Number of extra attempts granted to a chunk failing with a retryable error
    retry_limit: usize,
    classifier: FailureClassifier,
    workers: usize,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution, context: &StepContext) -> StepOutcome {
        execute_with_listeners(&self.listeners, step_execution, context, |step_execution| {
            if let Err(error) = self.writer.open() {
                error!("Unable to open writer of {}: {}", self.name, error);
                return StepOutcome::failure(ErrorKind::Fatal, error);
            }

            let outcome = self.run_workers(step_execution, context);

            Self::manage_error(self.writer.close());

            outcome
        })
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    fn run_workers(&self, step_execution: &mut StepExecution, context: &StepContext) -> StepOutcome {
        let shared = ChunkWorkers {
            read_lock: Mutex::new(()),
            exhausted: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            skip_policy: SkipPolicy::new(self.skip_limit),
            step_execution: Mutex::new(step_execution),
        };

        let results = if self.workers <= 1 {
            vec![self.run_worker(&shared, context)]
        } else {
            debug!("Starting {} chunk workers for {}", self.workers, self.name);
            let shared = &shared;
            thread::scope(|scope| {
                let handles: Vec<_> = (0..self.workers)
                    .map(|_| scope.spawn(move || self.run_worker(shared, context)))
                    .collect();

                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(ChunkFailure {
                                kind: ErrorKind::Fatal,
                                detail: "chunk worker panicked".to_string(),
                            })
                        })
                    })
                    .collect::<Vec<_>>()
            })
        };

        let mut stopped = false;
        for result in results {
            match result {
                Err(failure) => return StepOutcome::failure(failure.kind, failure.detail),
                Ok(WorkerEnd::Stopped) => stopped = true,
                Ok(_) => {}
            }
        }

        if stopped && !shared.exhausted.load(Ordering::SeqCst) {
            StepOutcome::Success(ExitStatus::stopped())
        } else {
            StepOutcome::Success(ExitStatus::completed())
        }
    }

    fn run_worker(&self, workers: &ChunkWorkers, context: &StepContext) -> Result<WorkerEnd, ChunkFailure> {
        loop {
            if workers.halted.load(Ordering::SeqCst) {
                return Ok(WorkerEnd::Halted);
            }
            if context.is_stop_requested() {
                debug!("Stop requested, {} ends after its last chunk", self.name);
                return Ok(WorkerEnd::Stopped);
            }

            let mut contribution = StepContribution::default();
            let result = self.read_chunk(workers, &mut contribution).and_then(|mut chunk| {
                if !chunk.is_empty() {
                    self.process_and_write(&mut chunk, workers, &mut contribution)?;
                }
                Ok(chunk.get_status())
            });
            workers.apply(&contribution);

            match result {
                Ok(ChunkStatus::Finished) => return Ok(WorkerEnd::Exhausted),
                Ok(_) => {}
                Err(failure) => {
                    workers.halted.store(true, Ordering::SeqCst);
                    return Err(failure);
                }
            }
        }
    }

    /// Reads up to `chunk_size` items while holding the read lock.
    fn read_chunk(
        &self,
        workers: &ChunkWorkers,
        contribution: &mut StepContribution,
    ) -> Result<Chunk<I>, ChunkFailure> {
        let _guard = workers.read_lock.lock();
        let mut chunk = Chunk::new(self.chunk_size);

        if workers.exhausted.load(Ordering::SeqCst) {
            chunk.finish();
            return Ok(chunk);
        }

        debug!("Start reading chunk");
        let mut read_retry = RetryContext::new(self.retry_limit);
        while chunk.get_status() == ChunkStatus::Continuable {
            read_retry.start_attempt();
            match self.reader.read() {
                Ok(Some(item)) => {
                    chunk.add_item(item);
                    contribution.read_count += 1;
                    read_retry = RetryContext::new(self.retry_limit);
                }
                Ok(None) => {
                    workers.exhausted.store(true, Ordering::SeqCst);
                    chunk.finish();
                }
                Err(error) => {
                    let kind = self.classifier.classify(&error);
                    if kind == FailureKind::Retryable && read_retry.register_failure(&error) {
                        contribution.retry_count += 1;
                        warn!(
                            "Read attempt {} of {} failed, reading again: {}",
                            read_retry.attempt(),
                            self.name,
                            error
                        );
                        continue;
                    }

                    // once retries are spent a failed read is skipped or fatal
                    let kind = match kind {
                        FailureKind::Fatal => FailureKind::Fatal,
                        _ => FailureKind::Skippable,
                    };
                    self.skip(kind, &error, workers)?;
                    contribution.read_skip_count += 1;
                    read_retry = RetryContext::new(self.retry_limit);
                }
            }
        }
        debug!("End reading chunk: {:?}", chunk.get_status());

        Ok(chunk)
    }

    fn process_and_write(
        &self,
        chunk: &mut Chunk<I>,
        workers: &ChunkWorkers,
        contribution: &mut StepContribution,
    ) -> Result<(), ChunkFailure> {
        let mut retry_context = RetryContext::new(self.retry_limit);

        loop {
            let attempt = retry_context.start_attempt();

            let error = match self.attempt_chunk(chunk, workers, contribution) {
                Ok(()) => return Ok(()),
                Err(AttemptError::Fatal(failure)) => return Err(failure),
                Err(AttemptError::Retryable(error)) => error,
            };

            contribution.rollback_count += 1;

            if retry_context.register_failure(&error) {
                contribution.retry_count += 1;
                warn!(
                    "Chunk attempt {} of {} rolled back, retrying: {}",
                    attempt, self.name, error
                );
            } else {
                error!(
                    "Chunk of {} failed after {} attempts: {}",
                    self.name, attempt, error
                );
                return Err(ChunkFailure::new(ErrorKind::RetryLimitExceeded, &error));
            }
        }
    }

    /// Processes every remaining item of the chunk and writes the survivors.
    fn attempt_chunk(
        &self,
        chunk: &mut Chunk<I>,
        workers: &ChunkWorkers,
        contribution: &mut StepContribution,
    ) -> Result<(), AttemptError> {
        debug!("Processing chunk of {} items", chunk.len());

        let mut processed_items = Vec::with_capacity(chunk.len());
        let mut filtered = 0;
        let mut index = 0;

        while index < chunk.len() {
            match self.processor.process(&chunk.get_items()[index]) {
                Ok(Some(processed_item)) => {
                    processed_items.push(processed_item);
                    index += 1;
                }
                Ok(None) => {
                    filtered += 1;
                    index += 1;
                }
                Err(error) => match self.classifier.classify(&error) {
                    FailureKind::Retryable => return Err(AttemptError::Retryable(error)),
                    kind => {
                        self.skip(kind, &error, workers)
                            .map_err(AttemptError::Fatal)?;
                        chunk.remove(index);
                        contribution.process_skip_count += 1;
                    }
                },
            }
        }

        self.write_chunk(&processed_items, workers, contribution)?;

        contribution.filter_count += filtered;
        contribution.commit_count += 1;
        Ok(())
    }

    fn write_chunk(
        &self,
        processed_items: &[O],
        workers: &ChunkWorkers,
        contribution: &mut StepContribution,
    ) -> Result<(), AttemptError> {
        if processed_items.is_empty() {
            debug!("No items to write, skipping write call");
            return Ok(());
        }

        debug!("Writing chunk of {} items", processed_items.len());

        let error = match self.write_items(processed_items) {
            Ok(()) => {
                contribution.write_count += processed_items.len();
                return Ok(());
            }
            Err(error) => error,
        };

        match self.classifier.classify(&error) {
            FailureKind::Retryable => Err(AttemptError::Retryable(error)),
            FailureKind::Skippable if workers.skip_policy.is_enabled() => {
                warn!("Error writing items, scanning chunk item by item: {}", error);
                self.scan_chunk(processed_items, workers, contribution)
                    .map_err(AttemptError::Fatal)
            }
            _ => Err(AttemptError::Fatal(ChunkFailure::new(ErrorKind::Fatal, &error))),
        }
    }

    /// Writes items one at a time to isolate the ones the writer rejects.
    fn scan_chunk(
        &self,
        processed_items: &[O],
        workers: &ChunkWorkers,
        contribution: &mut StepContribution,
    ) -> Result<(), ChunkFailure> {
        for item in processed_items {
            match self.write_items(std::slice::from_ref(item)) {
                Ok(()) => contribution.write_count += 1,
                Err(error) => {
                    let kind = match self.classifier.classify(&error) {
                        FailureKind::Skippable => FailureKind::Skippable,
                        _ => FailureKind::Fatal,
                    };
                    self.skip(kind, &error, workers)?;
                    contribution.write_skip_count += 1;
                }
            }
        }
        Ok(())
    }

    fn write_items(&self, items: &[O]) -> Result<(), BatchError> {
        self.writer.write(items)?;
        self.writer.flush()
    }

    /// Consumes one skip from the budget, or turns the error into a step failure.
    fn skip(&self, kind: FailureKind, error: &BatchError, workers: &ChunkWorkers) -> Result<(), ChunkFailure> {
        match kind {
            FailureKind::Skippable if workers.skip_policy.try_skip() => {
                warn!("Skipping item in {}: {}", self.name, error);
                Ok(())
            }
            FailureKind::Skippable if workers.skip_policy.is_enabled() => {
                error!("Skip limit of {} reached in {}: {}", self.skip_limit, self.name, error);
                Err(ChunkFailure::new(ErrorKind::SkipLimitExceeded, error))
            }
            _ => {
                error!("Non skippable error in {}: {}", self.name, error);
                Err(ChunkFailure::new(ErrorKind::Fatal, error))
            }
        }
    }

    /// Logs errors from operations that must not fail the step.
    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    listeners: Vec<&'a dyn StepExecutionListener>,
    chunk_size: usize,
    skip_limit: usize,
    retry_limit: usize,
    classifier: FailureClassifier,
    core_workers: usize,
    max_workers: usize,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            listeners: Vec::new(),
            chunk_size: 10,
            skip_limit: 0,
            retry_limit: 0,
            classifier: FailureClassifier::default(),
            core_workers: 1,
            max_workers: 1,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enables fault tolerant skipping of up to `skip_limit` items.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Grants a chunk failing with a retryable error `retry_limit` extra attempts.
    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Processes chunks on `core_workers` threads, which may not exceed `max_workers`.
    pub fn parallel(mut self, core_workers: usize, max_workers: usize) -> Self {
        self.core_workers = core_workers;
        self.max_workers = max_workers;
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError>
    where
        PassThroughProcessor: ItemProcessor<I, O>,
    {
        let processor = self.processor.unwrap_or(&PassThroughProcessor);
        self.build_with(processor)
    }

    /// Builds a step whose processor changes the item type.
    pub fn build_with_processor(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        let processor = self.processor.ok_or_else(|| {
            BatchError::Configuration(format!("step {} has no processor", self.name))
        })?;
        self.build_with(processor)
    }

    fn build_with(
        self,
        processor: &'a dyn ItemProcessor<I, O>,
    ) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        let reader = self.reader.ok_or_else(|| {
            BatchError::Configuration(format!("step {} has no reader", self.name))
        })?;
        let writer = self.writer.ok_or_else(|| {
            BatchError::Configuration(format!("step {} has no writer", self.name))
        })?;

        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "step {} has a chunk size of 0",
                self.name
            )));
        }
        if self.core_workers == 0 || self.core_workers > self.max_workers {
            return Err(BatchError::Configuration(format!(
                "step {} needs 0 < core workers ({}) <= max workers ({})",
                self.name, self.core_workers, self.max_workers
            )));
        }

        Ok(ChunkOrientedStep {
            name: self.name,
            reader,
            processor,
            writer,
            listeners: self.listeners,
            chunk_size: self.chunk_size,
            skip_limit: self.skip_limit,
            retry_limit: self.retry_limit,
            classifier: self.classifier,
            workers: self.core_workers,
        })
    }
}
