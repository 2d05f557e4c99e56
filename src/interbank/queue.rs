//! Delay Queue
//!
//! In-process realization of the delay-queue / dead-letter topology:
//!
//! ```text
//! publish_delayed ──► interbank.delay.queue (TTL)
//!                          │ expired
//!                          ▼
//!                     interbank.dlx ──[interbank.process]──► interbank.process.queue ──► consumer (1)
//!                                                                  │ reject
//!                                                                  ▼
//!                                                           interbank.failed.queue
//! ```
//!
//! # Delivery Semantics
//!
//! - At-least-once: a [`Delivery`] dropped without `ack`/`reject` is redelivered
//!   with `redelivered = true`
//! - Rejected deliveries are never requeued; they land on the failure topic
//! - No ordering guarantee across transfers
//!
//! Messages only carry the transfer id. Durability across restarts comes from
//! the transfer store: the recovery worker republishes overdue `RESERVED`
//! transfers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core_types::TransferId;

/// Queue names and consumer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueTopology {
    pub delay_queue: String,
    pub dead_letter_exchange: String,
    pub routing_key: String,
    pub process_queue: String,
    pub failure_queue: String,
    /// Declared message TTL of the delay queue (mirrors the cool-down)
    pub message_ttl_ms: u64,
    pub prefetch: u16,
    pub concurrency: usize,
    pub requeue_rejected: bool,
    /// Bound of the process queue buffer
    pub capacity: usize,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            delay_queue: "interbank.delay.queue".to_string(),
            dead_letter_exchange: "interbank.dlx".to_string(),
            routing_key: "interbank.process".to_string(),
            process_queue: "interbank.process.queue".to_string(),
            failure_queue: "interbank.failed.queue".to_string(),
            message_ttl_ms: 900_000,
            prefetch: 1,
            concurrency: 1,
            requeue_rejected: false,
            capacity: 1024,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue closed: {0}")]
    Closed(String),
}

/// Message on the process queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMessage {
    pub transfer_id: TransferId,
    pub redelivered: bool,
}

/// Entry on the failure topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub transfer_id: TransferId,
    pub reason: String,
    pub redelivered: bool,
    /// Unix millis
    pub failed_at: i64,
}

/// Publishing side of the delay queue
#[async_trait]
pub trait DelayBroker: Send + Sync {
    /// Hold the transfer id for `ttl`, then route it to the process queue
    async fn publish_delayed(&self, transfer_id: TransferId, ttl: Duration)
    -> Result<(), QueueError>;

    /// Route straight to the process queue (recovery path)
    async fn publish_now(&self, transfer_id: TransferId) -> Result<(), QueueError>;

    /// Snapshot of the failure topic
    fn dead_letters(&self) -> Vec<DeadLetter>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct DeadLetterLog {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterLog {
    fn push(&self, queue: &str, message: QueueMessage, reason: String) {
        warn!(
            transfer_id = %message.transfer_id,
            queue,
            reason = %reason,
            "Message dead-lettered"
        );
        lock(&self.entries).push(DeadLetter {
            transfer_id: message.transfer_id,
            reason,
            redelivered: message.redelivered,
            failed_at: chrono::Utc::now().timestamp_millis(),
        });
    }

    fn snapshot(&self) -> Vec<DeadLetter> {
        lock(&self.entries).clone()
    }
}

/// Delayed message ordered by due time, then publish order
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    due: Instant,
    seq: u64,
    transfer_id: TransferId,
}

struct BrokerShared {
    topology: QueueTopology,
    delayed: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    wake: Notify,
    seq: AtomicU64,
    process_tx: mpsc::Sender<QueueMessage>,
    dead: Arc<DeadLetterLog>,
}

/// In-memory delay broker
///
/// A single timer task moves expired messages from the delay heap into the
/// bounded process queue.
pub struct MemoryBroker {
    shared: Arc<BrokerShared>,
}

impl MemoryBroker {
    /// Declare the topology and spawn the timer task
    ///
    /// Returns the broker (publishing side) and the only consumer of the
    /// process queue. Must be called inside a tokio runtime.
    pub fn start(topology: QueueTopology) -> (Arc<Self>, Consumer) {
        let (process_tx, process_rx) = mpsc::channel(topology.capacity.max(1));
        let dead = Arc::new(DeadLetterLog::default());

        info!(
            delay_queue = %topology.delay_queue,
            dlx = %topology.dead_letter_exchange,
            routing_key = %topology.routing_key,
            process_queue = %topology.process_queue,
            ttl_ms = topology.message_ttl_ms,
            prefetch = topology.prefetch,
            "Declared interbank queue topology"
        );

        let shared = Arc::new(BrokerShared {
            topology: topology.clone(),
            delayed: Mutex::new(BinaryHeap::new()),
            wake: Notify::new(),
            seq: AtomicU64::new(0),
            process_tx: process_tx.clone(),
            dead: dead.clone(),
        });

        tokio::spawn(run_timer(shared.clone()));

        let consumer = Consumer {
            rx: process_rx,
            requeue: process_tx,
            dead,
            topology,
        };
        (Arc::new(Self { shared }), consumer)
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.shared.topology
    }

    /// Messages still waiting out their TTL
    pub fn delayed_len(&self) -> usize {
        lock(&self.shared.delayed).len()
    }
}

#[async_trait]
impl DelayBroker for MemoryBroker {
    async fn publish_delayed(
        &self,
        transfer_id: TransferId,
        ttl: Duration,
    ) -> Result<(), QueueError> {
        if self.shared.process_tx.is_closed() {
            return Err(QueueError::Closed(self.shared.topology.process_queue.clone()));
        }

        let scheduled = Scheduled {
            due: Instant::now() + ttl,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            transfer_id,
        };
        lock(&self.shared.delayed).push(Reverse(scheduled));
        self.shared.wake.notify_one();

        debug!(
            transfer_id = %transfer_id,
            queue = %self.shared.topology.delay_queue,
            ttl_ms = ttl.as_millis() as u64,
            "Published delayed message"
        );
        Ok(())
    }

    async fn publish_now(&self, transfer_id: TransferId) -> Result<(), QueueError> {
        self.shared
            .process_tx
            .send(QueueMessage {
                transfer_id,
                redelivered: false,
            })
            .await
            .map_err(|_| QueueError::Closed(self.shared.topology.process_queue.clone()))?;

        debug!(
            transfer_id = %transfer_id,
            queue = %self.shared.topology.process_queue,
            "Published message"
        );
        Ok(())
    }

    fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead.snapshot()
    }
}

/// Timer task: dead-letter expired messages into the process queue
async fn run_timer(shared: Arc<BrokerShared>) {
    loop {
        let next_due = lock(&shared.delayed).peek().map(|Reverse(s)| s.due);

        match next_due {
            None => shared.wake.notified().await,
            Some(due) if due > Instant::now() => {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = shared.wake.notified() => {}
                }
            }
            Some(_) => {
                let expired = lock(&shared.delayed).pop();
                let Some(Reverse(expired)) = expired else {
                    continue;
                };
                let message = QueueMessage {
                    transfer_id: expired.transfer_id,
                    redelivered: false,
                };
                if shared.process_tx.send(message).await.is_err() {
                    warn!(
                        queue = %shared.topology.process_queue,
                        "Process queue closed, stopping delay timer"
                    );
                    return;
                }
                debug!(
                    transfer_id = %expired.transfer_id,
                    exchange = %shared.topology.dead_letter_exchange,
                    routing_key = %shared.topology.routing_key,
                    "TTL expired, routed to process queue"
                );
            }
        }
    }
}

/// The single consumer of the process queue
pub struct Consumer {
    rx: mpsc::Receiver<QueueMessage>,
    requeue: mpsc::Sender<QueueMessage>,
    dead: Arc<DeadLetterLog>,
    topology: QueueTopology,
}

impl Consumer {
    /// Wait for the next delivery
    pub async fn next(&mut self) -> Option<Delivery> {
        let message = self.rx.recv().await?;
        Some(Delivery {
            message,
            requeue: self.requeue.clone(),
            dead: self.dead.clone(),
            failure_queue: self.topology.failure_queue.clone(),
            requeue_rejected: self.topology.requeue_rejected,
            settled: false,
        })
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }
}

/// A message handed to the consumer, awaiting manual ack
pub struct Delivery {
    message: QueueMessage,
    requeue: mpsc::Sender<QueueMessage>,
    dead: Arc<DeadLetterLog>,
    failure_queue: String,
    requeue_rejected: bool,
    settled: bool,
}

impl Delivery {
    pub fn transfer_id(&self) -> TransferId {
        self.message.transfer_id
    }

    pub fn redelivered(&self) -> bool {
        self.message.redelivered
    }

    /// Processing finished; drop the message
    pub fn ack(mut self) {
        self.settled = true;
        debug!(transfer_id = %self.message.transfer_id, "Delivery acked");
    }

    /// Processing failed; route to the failure topic
    pub fn reject(mut self, reason: impl Into<String>) {
        self.settled = true;
        let reason = reason.into();
        if self.requeue_rejected {
            self.redeliver();
        } else {
            self.dead.push(&self.failure_queue, self.message, reason);
        }
    }

    fn redeliver(&self) {
        let message = QueueMessage {
            redelivered: true,
            ..self.message
        };
        if let Err(e) = self.requeue.try_send(message) {
            error!(
                transfer_id = %message.transfer_id,
                error = %e,
                "Redelivery failed"
            );
            self.dead
                .push(&self.failure_queue, message, format!("redelivery failed: {}", e));
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                transfer_id = %self.message.transfer_id,
                "Delivery dropped without ack, redelivering"
            );
            self.redeliver();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> QueueTopology {
        QueueTopology {
            capacity: 16,
            ..QueueTopology::default()
        }
    }

    async fn next_within(consumer: &mut Consumer, ms: u64) -> Option<Delivery> {
        tokio::time::timeout(Duration::from_millis(ms), consumer.next())
            .await
            .ok()
            .flatten()
    }

    #[test]
    fn test_default_topology() {
        let t = QueueTopology::default();
        assert_eq!(t.delay_queue, "interbank.delay.queue");
        assert_eq!(t.dead_letter_exchange, "interbank.dlx");
        assert_eq!(t.routing_key, "interbank.process");
        assert_eq!(t.process_queue, "interbank.process.queue");
        assert_eq!(t.message_ttl_ms, 900_000);
        assert_eq!(t.prefetch, 1);
        assert_eq!(t.concurrency, 1);
        assert!(!t.requeue_rejected);
    }

    #[tokio::test]
    async fn test_delayed_message_honors_ttl() {
        let (broker, mut consumer) = MemoryBroker::start(topology());
        let id = TransferId::new();

        broker
            .publish_delayed(id, Duration::from_millis(150))
            .await
            .unwrap();
        assert_eq!(broker.delayed_len(), 1);

        // Not before the TTL
        assert!(next_within(&mut consumer, 50).await.is_none());

        let delivery = next_within(&mut consumer, 1000).await.unwrap();
        assert_eq!(delivery.transfer_id(), id);
        assert!(!delivery.redelivered());
        delivery.ack();
        assert_eq!(broker.delayed_len(), 0);
    }

    #[tokio::test]
    async fn test_delayed_messages_expire_in_due_order() {
        let (broker, mut consumer) = MemoryBroker::start(topology());
        let late = TransferId::new();
        let early = TransferId::new();

        broker
            .publish_delayed(late, Duration::from_millis(200))
            .await
            .unwrap();
        broker
            .publish_delayed(early, Duration::from_millis(20))
            .await
            .unwrap();

        let first = next_within(&mut consumer, 1000).await.unwrap();
        assert_eq!(first.transfer_id(), early);
        first.ack();
        let second = next_within(&mut consumer, 1000).await.unwrap();
        assert_eq!(second.transfer_id(), late);
        second.ack();
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_redelivered() {
        let (broker, mut consumer) = MemoryBroker::start(topology());
        let id = TransferId::new();
        broker.publish_now(id).await.unwrap();

        let delivery = next_within(&mut consumer, 500).await.unwrap();
        drop(delivery);

        let again = next_within(&mut consumer, 500).await.unwrap();
        assert_eq!(again.transfer_id(), id);
        assert!(again.redelivered());
        again.ack();

        assert!(next_within(&mut consumer, 50).await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_delivery_goes_to_failure_topic() {
        let (broker, mut consumer) = MemoryBroker::start(topology());
        let id = TransferId::new();
        broker.publish_now(id).await.unwrap();

        let delivery = next_within(&mut consumer, 500).await.unwrap();
        delivery.reject("storage down");

        // Not requeued
        assert!(next_within(&mut consumer, 50).await.is_none());

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].transfer_id, id);
        assert_eq!(dead[0].reason, "storage down");
    }

    #[tokio::test]
    async fn test_publish_fails_when_consumer_gone() {
        let (broker, consumer) = MemoryBroker::start(topology());
        drop(consumer);
        assert!(matches!(
            broker.publish_now(TransferId::new()).await,
            Err(QueueError::Closed(_))
        ));
        assert!(
            broker
                .publish_delayed(TransferId::new(), Duration::from_millis(1))
                .await
                .is_err()
        );
    }
}
