//! Durable message broker wrapper (spec §4.1.5), ported from the
//! `pika`-based RabbitMQ helpers in `talos.util.queue_helpers`.
//!
//! `MessageBroker` is the seam the worker loop depends on; `AmqpBroker`
//! is the production implementation over `lapin`, and `TestBroker` is
//! an in-memory double for component tests (mirroring the teacher's
//! `JobStore` trait + in-memory test store pattern in
//! `kernel/jobs/testing.rs`).

mod amqp;
mod test_broker;

pub use amqp::AmqpBroker;
pub use test_broker::TestBroker;

use async_trait::async_trait;

use crate::error::QueueError;

/// A single message pulled off a queue. Dropping this without calling
/// [`Delivery::ack`] or [`Delivery::nack_requeue`] leaves the message
/// unacknowledged on the broker side (it will be redelivered once the
/// channel closes) — callers should always settle it explicitly.
pub struct Delivery {
    pub payload: Vec<u8>,
    settle: DeliverySettle,
}

enum DeliverySettle {
    Amqp(lapin::message::Delivery),
    Test {
        queue: String,
        broker: std::sync::Weak<test_broker::Inner>,
    },
}

impl Delivery {
    pub async fn ack(self) -> Result<(), QueueError> {
        match self.settle {
            DeliverySettle::Amqp(delivery) => delivery
                .ack(lapin::options::BasicAckOptions::default())
                .await
                .map_err(QueueError::from),
            DeliverySettle::Test { .. } => Ok(()),
        }
    }

    pub async fn nack_requeue(self) -> Result<(), QueueError> {
        match self.settle {
            DeliverySettle::Amqp(delivery) => delivery
                .nack(lapin::options::BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
                .map_err(QueueError::from),
            DeliverySettle::Test { queue, broker } => {
                if let Some(inner) = broker.upgrade() {
                    test_broker::requeue(&inner, &queue, self.payload).await;
                }
                Ok(())
            }
        }
    }
}

/// A handler for `consume_forever`, kept as its own trait (rather than
/// a generic closure parameter) so `MessageBroker` stays object-safe.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, payload: Vec<u8>) -> Result<(), QueueError>;
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    async fn publish_batch(&self, queue: &str, payloads: Vec<Vec<u8>>) -> Result<(), QueueError> {
        for payload in payloads {
            self.publish(queue, payload).await?;
        }
        Ok(())
    }

    async fn consume_one(&self, queue: &str) -> Result<Option<Delivery>, QueueError>;

    async fn consume_n(&self, queue: &str, n: usize) -> Result<Vec<Delivery>, QueueError> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.consume_one(queue).await? {
                Some(delivery) => out.push(delivery),
                None => break,
            }
        }
        Ok(out)
    }

    /// Consumes from `queue` with prefetch 1, handing each message to
    /// `handler` and acking on success / requeueing on failure. Runs
    /// until the underlying channel closes or the broker is dropped.
    async fn consume_forever(
        &self,
        queue: &str,
        handler: std::sync::Arc<dyn DeliveryHandler>,
    ) -> Result<(), QueueError>;
}
