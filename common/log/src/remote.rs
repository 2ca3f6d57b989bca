//! Batched shipping of captured log records to a remote HTTP collector.
//!
//! Mirrors the `remoteLogging.*` configuration surface: records are queued in
//! memory, flushed either when a batch fills up or on a timer, and a failed
//! flush is retried a bounded number of times before the batch is dropped.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;

/// Configuration for the remote log shipper, as carried by the
/// `remoteLogging.*` keys of the agent's configuration surface.
#[derive(Clone, Debug)]
pub struct RemoteLoggingConfig {
    /// HTTP endpoint records are `POST`ed to as a JSON array.
    pub endpoint: reqwest::Url,

    /// Maximum number of records buffered per flushed batch.
    pub batch_size: usize,

    /// Maximum time to wait before flushing a non-empty, under-sized batch.
    pub batch_interval: Duration,

    /// Upper bound on the number of records held in memory; oldest records
    /// are dropped once exceeded.
    pub max_memory_usage: usize,

    /// Number of retry attempts for a batch that fails to be shipped.
    pub retry_attempts: u32,

    /// Delay between consecutive retry attempts of the same batch.
    pub retry_delay: Duration,
}

/// A single captured log record, ready for JSON serialization.
#[derive(Debug, Serialize)]
struct RemoteRecord {
    level: String,
    target: String,
    message: String,
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

struct Queue {
    records: VecDeque<RemoteRecord>,
    max_len: usize,
}

impl Queue {
    fn push(&mut self, record: RemoteRecord) {
        if self.records.len() >= self.max_len {
            let _ = self.records.pop_front();
        }
        self.records.push_back(record);
    }
}

/// [`Layer`] that captures every [`tracing`] event into the shared queue fed
/// to the background flusher task.
pub struct RemoteLayer {
    queue: Arc<Mutex<Queue>>,
}

impl<S> Layer<S> for RemoteLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        queue.push(RemoteRecord {
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        });
    }
}

/// Handle to a spawned remote-shipping background task.
///
/// Dropping it stops the task once its current flush (if any) completes.
pub struct ShipperHandle {
    queue: Arc<Mutex<Queue>>,
    task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for ShipperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShipperHandle").finish_non_exhaustive()
    }
}

impl ShipperHandle {
    /// Returns a [`RemoteLayer`] feeding this shipper's queue, to be added to
    /// the global [`tracing_subscriber::Registry`].
    #[must_use]
    pub fn layer(&self) -> RemoteLayer {
        RemoteLayer {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl Drop for ShipperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns the background task that periodically flushes queued records to
/// `config.endpoint`.
#[must_use]
pub fn spawn_shipper(config: RemoteLoggingConfig) -> ShipperHandle {
    let queue = Arc::new(Mutex::new(Queue {
        records: VecDeque::new(),
        max_len: config.max_memory_usage,
    }));
    let queue_for_task = Arc::clone(&queue);

    let task = tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut interval = tokio::time::interval(config.batch_interval);
        loop {
            interval.tick().await;

            let batch: Vec<RemoteRecord> = {
                let mut queue =
                    queue_for_task.lock().unwrap_or_else(|p| p.into_inner());
                let n = config.batch_size.min(queue.records.len());
                queue.records.drain(..n).collect()
            };
            if batch.is_empty() {
                continue;
            }

            let mut attempt = 0;
            loop {
                attempt += 1;
                match client
                    .post(config.endpoint.clone())
                    .json(&batch)
                    .send()
                    .await
                {
                    Ok(resp) if resp.status().is_success() => break,
                    Ok(resp) => {
                        tracing::warn!(
                            status = %resp.status(),
                            "remote log shipment rejected",
                        );
                    }
                    Err(e) => {
                        tracing::warn!("remote log shipment failed: {e}");
                    }
                }
                if attempt > config.retry_attempts {
                    tracing::error!(
                        "dropping log batch of {} records after {} attempts",
                        batch.len(),
                        attempt - 1,
                    );
                    break;
                }
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    });

    ShipperHandle {
        queue,
        task,
    }
}
