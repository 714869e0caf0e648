//! Email processing pipeline — classification through action execution.

pub mod processor;

pub use processor::{EmailProcessor, ProcessedEmail};
