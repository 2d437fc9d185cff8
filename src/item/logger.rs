use std::fmt::Debug;

use log::info;

use crate::{BatchError, core::item::ItemWriter};

/// Writer that logs every item at `info` level.
#[derive(Default)]
pub struct LoggerWriter {
    target: Option<String>,
}

impl LoggerWriter {
    /// Logs under `target` instead of this module's path.
    pub fn with_target(target: &str) -> Self {
        Self {
            target: Some(target.to_string()),
        }
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> Result<(), BatchError> {
        match &self.target {
            Some(target) => items
                .iter()
                .for_each(|item| info!(target: target.as_str(), "Record:{:?}", item)),
            None => items.iter().for_each(|item| info!("Record:{:?}", item)),
        }
        Ok(())
    }
}
