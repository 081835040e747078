use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::Job;

/// A job with its delivery count. Attempts start at 1.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: Job,
    pub attempt: u32,
}

/// Where handlers publish follow-up jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
}

/// In-process queue over an unbounded tokio channel.
///
/// At-least-once within the process: the worker re-enqueues failed
/// deliveries with a bumped attempt counter.
pub struct MemoryJobQueue {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub(crate) fn redeliver(&self, delivery: Delivery) -> Result<()> {
        self.tx.send(delivery).context("Queue channel closed")
    }

    /// Pop the next delivery without waiting; `None` when the queue is
    /// empty right now.
    pub async fn try_next(&self) -> Option<Delivery> {
        self.rx.lock().await.try_recv().ok()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        self.redeliver(Delivery { job, attempt: 1 })
    }
}
