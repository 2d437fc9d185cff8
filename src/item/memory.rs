use parking_lot::Mutex;

use crate::{
    BatchError,
    core::item::{ItemReader, ItemReaderResult, ItemWriter},
};

/// Reader returning the items of an iterator, then end-of-data forever.
///
/// ```rust
/// use spring_batch_flow::core::item::ItemReader;
/// use spring_batch_flow::item::memory::IteratorItemReader;
///
/// let reader = IteratorItemReader::new(vec!["rose", "tulip"]);
///
/// assert_eq!(reader.read().unwrap(), Some("rose"));
/// assert_eq!(reader.read().unwrap(), Some("tulip"));
/// assert_eq!(reader.read().unwrap(), None);
/// assert_eq!(reader.read().unwrap(), None);
/// ```
pub struct IteratorItemReader<I> {
    items: Mutex<Box<dyn Iterator<Item = I> + Send>>,
}

impl<I> IteratorItemReader<I> {
    pub fn new<T>(items: T) -> Self
    where
        T: IntoIterator<Item = I>,
        T::IntoIter: Send + 'static,
    {
        Self {
            items: Mutex::new(Box::new(items.into_iter().fuse())),
        }
    }
}

impl<I> ItemReader<I> for IteratorItemReader<I> {
    fn read(&self) -> ItemReaderResult<I> {
        Ok(self.items.lock().next())
    }
}

/// Writer keeping every written item in memory.
pub struct InMemoryItemWriter<O> {
    items: Mutex<Vec<O>>,
    chunk_sizes: Mutex<Vec<usize>>,
}

impl<O> Default for InMemoryItemWriter<O> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            chunk_sizes: Mutex::new(Vec::new()),
        }
    }
}

impl<O: Clone> InMemoryItemWriter<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items written so far, in write order.
    pub fn get_items(&self) -> Vec<O> {
        self.items.lock().clone()
    }

    /// Size of every chunk handed to `write`, in call order.
    pub fn get_chunk_sizes(&self) -> Vec<usize> {
        self.chunk_sizes.lock().clone()
    }
}

impl<O> InMemoryItemWriter<O> {
    pub fn into_items(self) -> Vec<O> {
        self.items.into_inner()
    }
}

impl<O: Clone + Send> ItemWriter<O> for InMemoryItemWriter<O> {
    fn write(&self, items: &[O]) -> Result<(), BatchError> {
        self.chunk_sizes.lock().push(items.len());
        self.items.lock().extend_from_slice(items);
        Ok(())
    }
}
