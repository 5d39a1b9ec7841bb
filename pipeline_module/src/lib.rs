pub mod channel;
pub mod classifier;
pub mod deadline;
pub mod ingestion;
pub mod ingestion_queue;
pub mod materializer;
pub mod org_store;
pub mod roster;
pub mod sender_intel;
pub mod service;
pub mod task_store;
pub mod visibility;

pub use materializer::{Materializer, MaterializerConfig, ProcessingReport};
pub use service::{run_server, ServiceConfig};
