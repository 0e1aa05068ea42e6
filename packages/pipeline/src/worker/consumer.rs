use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::component::ConsumerPass;
use crate::queue::{DeliveryHandler, MessageBroker};
use crate::retry::retry_fixed;

/// Drives a [`ConsumerPass`] forever: sleep once at startup, then hand
/// the queue over to [`MessageBroker::consume_forever`] with a
/// retry-wrapped adapter. Ported from
/// `talos.workers.base_worker.ConsumerWorker.run`.
pub struct ConsumerLoop<C: ConsumerPass> {
    component: Arc<C>,
    broker: Arc<dyn MessageBroker>,
    queue: String,
    startup_sleep: Duration,
}

impl<C: ConsumerPass> ConsumerLoop<C> {
    pub fn new(
        component: Arc<C>,
        broker: Arc<dyn MessageBroker>,
        queue: String,
        startup_sleep: Duration,
    ) -> Self {
        Self {
            component,
            broker,
            queue,
            startup_sleep,
        }
    }

    pub async fn run(self) -> ! {
        tracing::info!(component = self.component.name(), queue = %self.queue, "starting consumer loop");
        tokio::time::sleep(self.startup_sleep).await;

        let adapter = Arc::new(RetryingHandler {
            component: self.component.clone(),
        });

        loop {
            // consume_forever only returns when the channel closes
            // (error) or, for the in-memory test double, when the
            // queue drains. Either way there's nothing left to drive
            // the loop, so treat return as a critical condition.
            let outcome = self.broker.consume_forever(&self.queue, adapter.clone()).await;
            let pipeline_err = match outcome {
                Ok(()) => crate::error::PipelineError::Fatal(
                    "consumer loop ended: broker channel closed".to_string(),
                ),
                Err(err) => err.into(),
            };
            self.component.handle_critical_error(&pipeline_err).await;
        }
    }
}

/// Bridges [`ConsumerPass::handle_message`] (retried, pipeline-error
/// typed) to the queue layer's [`DeliveryHandler`] (queue-error typed,
/// ack/nack driven by success).
struct RetryingHandler<C: ConsumerPass> {
    component: Arc<C>,
}

#[async_trait]
impl<C: ConsumerPass> DeliveryHandler for RetryingHandler<C> {
    async fn handle(&self, payload: Vec<u8>) -> Result<(), crate::error::QueueError> {
        let component = self.component.clone();
        let result = retry_fixed(
            component.retry_attempts(),
            component.retry_interval(),
            |err| err.is_retryable(),
            || {
                let component = component.clone();
                let payload = payload.clone();
                async move { component.handle_message(&payload).await }
            },
        )
        .await;

        result.map_err(|err| crate::error::QueueError::Routing(err.to_string()))
    }
}
