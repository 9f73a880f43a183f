//! Chat memory: deciding what to persist, and what to bring back.

pub mod availability;
pub mod dedup;
pub mod ingest;
pub mod inject;

pub use availability::Availability;
pub use dedup::{EventDeduplicator, SharedDedup};
pub use ingest::IngestionPipeline;
pub use inject::RetrievalInjector;
