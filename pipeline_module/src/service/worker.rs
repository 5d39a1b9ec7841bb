use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::ingestion_queue::IngestionQueue;
use crate::materializer::Materializer;

/// Handle for one queue-consumer thread.
pub struct WorkerControl {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerControl {
    pub fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Start a worker that drains the ingestion queue, one message at a time.
///
/// Each claim is materialized and marked done; errors mark the row failed
/// so the queue's backoff policy re-delivers it. Permanent outcomes
/// (unroutable, duplicate) are successes from the queue's point of view.
/// Multiple workers may run concurrently; the queue's lease protocol keeps
/// them off each other's rows.
pub fn spawn_pipeline_worker(
    worker_id: String,
    poll_interval: Duration,
    queue: Arc<dyn IngestionQueue>,
    materializer: Arc<Materializer>,
) -> WorkerControl {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        info!("pipeline worker {} started", worker_id);
        while !stop_flag.load(Ordering::Relaxed) {
            match queue.claim_next(&worker_id) {
                Ok(Some(item)) => {
                    let message = item.envelope.to_inbound_message();
                    match materializer.process(&message) {
                        Ok(report) => {
                            if let Err(err) = queue.mark_done(&item.id) {
                                warn!("failed to mark envelope done: {}", err);
                            }
                            info!(
                                "worker {} processed {}: {}",
                                worker_id,
                                item.envelope.dedupe_key,
                                report.outcome.as_str()
                            );
                        }
                        Err(err) => {
                            warn!(
                                "worker {} failed on {}: {}",
                                worker_id, item.envelope.dedupe_key, err
                            );
                            if let Err(mark_err) = queue.mark_failed(&item.id, &err.to_string()) {
                                warn!("failed to mark envelope failed: {}", mark_err);
                            }
                        }
                    }
                }
                Ok(None) => thread::sleep(poll_interval),
                Err(err) => {
                    warn!("worker {} claim error: {}", worker_id, err);
                    thread::sleep(poll_interval);
                }
            }
        }
        info!("pipeline worker {} stopped", worker_id);
    });

    WorkerControl {
        stop,
        handle: Some(handle),
    }
}
