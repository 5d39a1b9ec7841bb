mod auth;
mod config;
mod inbound;
mod server;
mod state;
mod worker;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::ServiceConfig;
pub use inbound::{ChatInboundPayload, EmailInboundPayload};
pub use server::run_server;
pub use worker::{spawn_pipeline_worker, WorkerControl};
