//! Batch processing on top of the pipeline

pub mod worker;

pub use worker::IngestWorker;
