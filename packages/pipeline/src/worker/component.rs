use std::time::Duration;

use async_trait::async_trait;

use crate::error::PipelineError;

/// Shared identity and failure policy for a pipeline worker, ported
/// from `talos.workers.base_worker.BaseWorker.__init__` (component
/// name, retry attempts/interval) and `_handle_critical_error`.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn retry_attempts(&self) -> u32 {
        3
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Called once retries are exhausted on a fatal (or
    /// retry-exhausted) error. The original logs and calls
    /// `sys.exit(1)` so an orchestrator restarts the container; we do
    /// the same rather than limp along with a guaranteed-broken
    /// component.
    async fn handle_critical_error(&self, err: &PipelineError) -> ! {
        tracing::error!(component = self.name(), error = %err, "unrecoverable error, exiting");
        std::process::exit(1);
    }
}

/// A component that runs one self-contained pass per tick (the
/// scheduler): no input message, just "do the work, then sleep".
#[async_trait]
pub trait ProducerPass: Component {
    async fn handle_one_pass(&self) -> Result<(), PipelineError>;
}

/// A component that processes one queued message at a time (the
/// community scanner and post rescanner).
#[async_trait]
pub trait ConsumerPass: Component {
    async fn handle_message(&self, payload: &[u8]) -> Result<(), PipelineError>;
}
