/// This module provides in-memory item readers and writers.
pub mod memory;

#[cfg(feature = "logger")]
/// This module provides a logger item writer, useful for debugging purposes.
pub mod logger;
