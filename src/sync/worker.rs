use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error};

use super::{MemoryJobQueue, SyncHandlers};

/// Drains the queue, handing each delivery to the handlers.
///
/// A failed delivery goes back on the queue with its attempt counter
/// bumped; after `max_deliveries` tries the job is dropped and logged, so
/// one poison message cannot wedge the pipeline.
pub struct Worker {
    queue: Arc<MemoryJobQueue>,
    handlers: Arc<SyncHandlers>,
    max_deliveries: u32,
}

impl Worker {
    pub fn new(queue: Arc<MemoryJobQueue>, handlers: Arc<SyncHandlers>, max_deliveries: u32) -> Self {
        Self {
            queue,
            handlers,
            max_deliveries,
        }
    }

    /// Process jobs until the queue is empty, including any follow-up jobs
    /// the handlers enqueue along the way. Returns how many deliveries
    /// were attempted.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut attempted = 0;
        while let Some(mut delivery) = self.queue.try_next().await {
            attempted += 1;
            let queue_name = delivery.job.queue_name();
            debug!(queue = queue_name, attempt = delivery.attempt, "handling job");

            match self.handlers.handle(&delivery.job).await {
                Ok(()) => {}
                Err(err) if delivery.attempt < self.max_deliveries => {
                    error!(
                        queue = queue_name,
                        attempt = delivery.attempt,
                        error = %err,
                        "job failed, re-enqueueing"
                    );
                    delivery.attempt += 1;
                    self.queue.redeliver(delivery)?;
                }
                Err(err) => {
                    error!(
                        queue = queue_name,
                        attempts = delivery.attempt,
                        error = %err,
                        "job failed on final delivery, dropping"
                    );
                }
            }
        }
        Ok(attempted)
    }
}
