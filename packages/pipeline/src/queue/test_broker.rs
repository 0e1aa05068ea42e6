use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Delivery, DeliveryHandler, DeliverySettle, MessageBroker};
use crate::error::QueueError;

/// In-memory double for [`super::MessageBroker`], used by component
/// tests so they don't need a live RabbitMQ instance (mirrors the
/// teacher's in-memory `JobStore` test double in
/// `kernel/jobs/testing.rs`).
///
/// Takes the same declared-queue set a real [`super::AmqpBroker`]
/// would get from `connect`, so tests exercise the same
/// unknown-queue rejection the live broker enforces.
#[derive(Clone)]
pub struct TestBroker {
    inner: Arc<Inner>,
    declared_queues: HashSet<String>,
}

#[derive(Default)]
pub struct Inner {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

pub(super) async fn requeue(inner: &Inner, queue: &str, payload: Vec<u8>) {
    let mut queues = inner.queues.lock().await;
    queues.entry(queue.to_string()).or_default().push_front(payload);
}

impl TestBroker {
    pub fn new(queues: &[&str]) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            declared_queues: queues.iter().map(|q| q.to_string()).collect(),
        }
    }

    /// Test helper: number of messages currently sitting in `queue`.
    pub async fn depth(&self, queue: &str) -> usize {
        let queues = self.inner.queues.lock().await;
        queues.get(queue).map(VecDeque::len).unwrap_or(0)
    }

    fn check_declared(&self, queue: &str) -> Result<(), QueueError> {
        if self.declared_queues.contains(queue) {
            Ok(())
        } else {
            Err(QueueError::UnknownQueue(queue.to_string()))
        }
    }
}

#[async_trait]
impl MessageBroker for TestBroker {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.check_declared(queue)?;
        let mut queues = self.inner.queues.lock().await;
        queues.entry(queue.to_string()).or_default().push_back(payload);
        Ok(())
    }

    async fn consume_one(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        self.check_declared(queue)?;
        let mut queues = self.inner.queues.lock().await;
        let popped = queues.get_mut(queue).and_then(VecDeque::pop_front);
        Ok(popped.map(|payload| Delivery {
            payload: payload.clone(),
            settle: DeliverySettle::Test {
                queue: queue.to_string(),
                broker: Arc::downgrade(&self.inner),
            },
        }))
    }

    /// Unlike the real broker this drains whatever is already queued
    /// and returns, rather than blocking forever — tests publish
    /// fixtures up front, run the loop once, then assert.
    async fn consume_forever(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), QueueError> {
        self.check_declared(queue)?;
        loop {
            let delivery = self.consume_one(queue).await?;
            let Some(delivery) = delivery else {
                return Ok(());
            };

            let payload = delivery.payload.clone();
            match handler.handle(payload).await {
                Ok(()) => delivery.ack().await?,
                Err(err) => {
                    tracing::warn!(error = %err, queue, "handler failed, requeueing");
                    delivery.nack_requeue().await?;
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        count: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl DeliveryHandler for CountingHandler {
        async fn handle(&self, _payload: Vec<u8>) -> Result<(), QueueError> {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(QueueError::MalformedMessage("boom".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_then_consume_one_round_trips_payload() {
        let broker = TestBroker::new(&["q"]);
        broker.publish("q", b"hello".to_vec()).await.unwrap();

        let delivery = broker.consume_one("q").await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"hello");
        delivery.ack().await.unwrap();

        assert_eq!(broker.depth("q").await, 0);
    }

    #[tokio::test]
    async fn consume_forever_drains_and_acks_queue() {
        let broker = TestBroker::new(&["q"]);
        broker.publish("q", b"one".to_vec()).await.unwrap();
        broker.publish("q", b"two".to_vec()).await.unwrap();

        let handler = Arc::new(CountingHandler {
            count: AtomicUsize::new(0),
            fail_first: false,
        });
        broker.consume_forever("q", handler.clone()).await.unwrap();

        assert_eq!(handler.count.load(Ordering::SeqCst), 2);
        assert_eq!(broker.depth("q").await, 0);
    }

    #[tokio::test]
    async fn nack_requeue_puts_message_back_on_the_queue() {
        let broker = TestBroker::new(&["q"]);
        broker.publish("q", b"one".to_vec()).await.unwrap();

        let delivery = broker.consume_one("q").await.unwrap().unwrap();
        assert_eq!(broker.depth("q").await, 0);
        delivery.nack_requeue().await.unwrap();

        assert_eq!(broker.depth("q").await, 1);
    }

    #[tokio::test]
    async fn consume_forever_returns_err_after_requeue_then_succeeds_on_redelivery() {
        let broker = TestBroker::new(&["q"]);
        broker.publish("q", b"one".to_vec()).await.unwrap();

        let handler = Arc::new(CountingHandler {
            count: AtomicUsize::new(0),
            fail_first: true,
        });

        assert!(broker.consume_forever("q", handler.clone()).await.is_err());
        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
        assert_eq!(broker.depth("q").await, 1);

        broker.consume_forever("q", handler.clone()).await.unwrap();
        assert_eq!(handler.count.load(Ordering::SeqCst), 2);
        assert_eq!(broker.depth("q").await, 0);
    }
}
