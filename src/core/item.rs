use crate::error::BatchError;

/// Result of a single read.
///
/// - `Ok(Some(item))`: an item was read
/// - `Ok(None)`: end of data, returned again on every later call
/// - `Err(error)`: the read failed
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item. `Ok(None)` filters the item out of the chunk.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of writing one chunk.
pub type ItemWriterResult = Result<(), BatchError>;

/// Source of the items processed by a chunk oriented step.
///
/// The step serializes calls to `read` so that every chunk is a contiguous
/// run of the source, even when several chunk workers are active.
pub trait ItemReader<I>: Sync {
    fn read(&self) -> ItemReaderResult<I>;
}

/// Business logic applied to every item read.
pub trait ItemProcessor<I, O>: Sync {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Output of a chunk oriented step, one chunk at a time.
///
/// A chunk may be handed to `write` again after a failed attempt, so
/// implementations must tolerate seeing the same batch twice.
pub trait ItemWriter<O>: Sync {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Processor used when a step declares none: every item passes unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_processor_keeps_item() {
        let processor = PassThroughProcessor;
        let result: ItemProcessorResult<String> = processor.process(&"rose".to_string());
        assert_eq!(result.unwrap(), Some("rose".to_string()));
    }
}
