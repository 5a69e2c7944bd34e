//! The job consumption loop.
//!
//! One message is in flight at a time. Each delivery is parsed, run through
//! the [`Pipeline`], and settled before the next fetch:
//!
//! - success: ack
//! - permanent failure (malformed payload, missing repository): reject
//!   without requeue, keep going
//! - anything else: reject with requeue, then return the error so the
//!   process exits and its supervisor restarts it

use crate::broker::{Delivery, MessageQueue};
use crate::error::JobError;
use crate::models::{CompositeMetric, Job};
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How a delivery is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Reject without requeue.
    Reject,
    /// Reject for redelivery.
    Requeue,
}

impl Disposition {
    /// The single mapping from a job outcome to its settlement.
    pub fn for_result<T>(result: &Result<T, JobError>) -> Self {
        match result {
            Ok(_) => Disposition::Ack,
            Err(e) if e.is_permanent() => Disposition::Reject,
            Err(_) => Disposition::Requeue,
        }
    }
}

/// Counters for the lifetime of a worker.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub started_at: DateTime<Utc>,
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub idle_polls: u64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            acked: 0,
            rejected: 0,
            requeued: 0,
            idle_polls: 0,
        }
    }
}

impl WorkerStats {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Ack => self.acked += 1,
            Disposition::Reject => self.rejected += 1,
            Disposition::Requeue => self.requeued += 1,
        }
    }

    pub fn summary(&self) -> String {
        let uptime = Utc::now().signed_duration_since(self.started_at);
        format!(
            "{} completed, {} rejected, {} requeued in {}s",
            self.acked,
            self.rejected,
            self.requeued,
            uptime.num_seconds()
        )
    }
}

/// Pull-based, strictly sequential consumer.
pub struct Worker {
    queue: Arc<dyn MessageQueue>,
    pipeline: Pipeline,
    idle_delay: Duration,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(queue: Arc<dyn MessageQueue>, pipeline: Pipeline, idle_delay: Duration) -> Self {
        Self {
            queue,
            pipeline,
            idle_delay,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Consume messages until `shutdown` turns true or a transient failure
    /// escalates.
    ///
    /// Shutdown is only observed between jobs.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), JobError> {
        info!("Starting message loop");

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, leaving message loop");
                break;
            }

            if self.poll_once().await?.is_none() {
                self.wait_idle(&mut shutdown).await;
            }
        }

        Ok(())
    }

    async fn wait_idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.idle_delay) => {}
            changed = shutdown.changed() => {
                // Sender gone: nobody can stop us any more, keep pacing.
                if changed.is_err() {
                    tokio::time::sleep(self.idle_delay).await;
                }
            }
        }
    }

    /// Fetch and fully handle at most one message.
    ///
    /// Returns `Ok(None)` when the queue was empty, the settlement otherwise.
    /// Transient failures are requeued and then returned as `Err`.
    pub async fn poll_once(&mut self) -> Result<Option<Disposition>, JobError> {
        let delivery = match self.queue.fetch().await.map_err(JobError::Broker)? {
            Some(delivery) => delivery,
            None => {
                self.stats.idle_polls += 1;
                return Ok(None);
            }
        };

        if delivery.redelivered {
            debug!("Message {} is a redelivery", delivery.tag);
        }

        let result = self.process(&delivery).await;
        let disposition = Disposition::for_result(&result);

        match result {
            Ok(composite) => {
                self.queue.ack(delivery).await.map_err(JobError::Broker)?;
                info!("Completed request: {}", composite.repo_id);
            }
            Err(e) if disposition == Disposition::Reject => {
                warn!(
                    "Rejecting message {}: {}",
                    String::from_utf8_lossy(&delivery.body),
                    e
                );
                self.queue
                    .reject(delivery, false)
                    .await
                    .map_err(JobError::Broker)?;
            }
            Err(e) => {
                error!("Job failed ({}), requeueing message: {}", e.class(), e);
                let tag = delivery.tag;
                match self.queue.reject(delivery, true).await {
                    Ok(()) => self.stats.record(disposition),
                    Err(requeue_err) => {
                        error!("Failed to requeue message {}: {}", tag, requeue_err)
                    }
                }
                return Err(e);
            }
        }

        self.stats.record(disposition);

        Ok(Some(disposition))
    }

    async fn process(&self, delivery: &Delivery) -> Result<CompositeMetric, JobError> {
        let job = Job::from_payload(&delivery.body)?;
        debug!("Message Received: {:?}", job);

        self.pipeline.run(&job).await
    }
}
