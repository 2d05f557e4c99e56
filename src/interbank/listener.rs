//! Payment Listener
//!
//! The single consumer of the process queue. Each delivery is handed to
//! `TransferCoordinator::execute` and acked once execution completes.
//! Execution errors reject the delivery onto the failure topic (no requeue).

use std::sync::Arc;

use tracing::{debug, error, info};

use super::coordinator::TransferCoordinator;
use super::queue::{Consumer, Delivery};

pub struct PaymentListener {
    coordinator: Arc<TransferCoordinator>,
    consumer: Consumer,
}

impl PaymentListener {
    pub fn new(coordinator: Arc<TransferCoordinator>, consumer: Consumer) -> Self {
        Self {
            coordinator,
            consumer,
        }
    }

    /// Consume forever, one delivery at a time
    pub async fn run(mut self) {
        let topology = self.consumer.topology();
        info!(
            queue = %topology.process_queue,
            prefetch = topology.prefetch,
            concurrency = topology.concurrency,
            "Starting interbank payment listener"
        );

        while self.process_next().await {}

        info!("Payment listener stopped: process queue closed");
    }

    /// Handle one delivery; false once the queue is closed
    pub async fn process_next(&mut self) -> bool {
        match self.consumer.next().await {
            Some(delivery) => {
                self.handle(delivery).await;
                true
            }
            None => false,
        }
    }

    async fn handle(&self, delivery: Delivery) {
        let transfer_id = delivery.transfer_id();
        debug!(
            transfer_id = %transfer_id,
            redelivered = delivery.redelivered(),
            "Processing interbank payment"
        );

        match self.coordinator.execute(transfer_id).await {
            Ok(status) => {
                debug!(transfer_id = %transfer_id, state = ?status, "Execute finished");
                delivery.ack();
            }
            Err(e) => {
                error!(transfer_id = %transfer_id, error = %e, "Execute failed, rejecting message");
                delivery.reject(e.to_string());
            }
        }
    }
}
