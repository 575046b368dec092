pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod messaging;
pub mod schedule;
pub mod sync;

#[cfg(test)]
pub mod testutil;

pub use error::Error;

// Re-export the main entry points for embedding callers
pub use ingest::{EntryIngestionPipeline, IngestOutcome};
pub use lifecycle::LifecycleService;
pub use schedule::WeekSchedule;
pub use sync::RecordingScheduleSynchronizer;
