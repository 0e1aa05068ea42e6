use std::sync::Arc;
use std::time::Duration;

use super::component::ProducerPass;
use crate::retry::retry_fixed;

/// Drives a [`ProducerPass`] forever: sleep once at startup (letting
/// dependencies like the broker connection settle), then loop calling
/// one retried pass per `sleep_interval` tick. Ported from
/// `talos.workers.base_worker.ProducerWorker.run`.
pub struct ProducerLoop<C: ProducerPass> {
    component: Arc<C>,
    startup_sleep: Duration,
    sleep_interval: Duration,
}

impl<C: ProducerPass> ProducerLoop<C> {
    pub fn new(component: Arc<C>, startup_sleep: Duration, sleep_interval: Duration) -> Self {
        Self {
            component,
            startup_sleep,
            sleep_interval,
        }
    }

    pub async fn run(self) -> ! {
        tracing::info!(component = self.component.name(), "starting producer loop");
        tokio::time::sleep(self.startup_sleep).await;

        loop {
            tokio::time::sleep(self.sleep_interval).await;

            let component = self.component.clone();
            let result = retry_fixed(
                component.retry_attempts(),
                component.retry_interval(),
                |err| err.is_retryable(),
                || {
                    let component = component.clone();
                    async move { component.handle_one_pass().await }
                },
            )
            .await;

            if let Err(err) = result {
                self.component.handle_critical_error(&err).await;
            }
        }
    }
}
