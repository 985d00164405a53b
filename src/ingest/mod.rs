//! Ingestion: the background task that turns unseen mail into stored,
//! classified records.

pub mod pipeline;

pub use pipeline::{IngestStats, IngestionLoop, LoopState, spawn_ingestion_loop};
