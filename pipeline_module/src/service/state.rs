use std::sync::Arc;

use crate::ingestion_queue::IngestionQueue;
use crate::materializer::Materializer;

use super::config::ServiceConfig;

#[derive(Clone)]
pub(super) struct AppState {
    pub config: Arc<ServiceConfig>,
    pub queue: Arc<dyn IngestionQueue>,
    pub materializer: Arc<Materializer>,
}
