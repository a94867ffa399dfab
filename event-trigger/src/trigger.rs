use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TriggerError;
use crate::stats::TriggerStatisticsSnapshot;

/// Shared contract between the streaming (Kafka) trigger and the cron
/// trigger (§9, Design Notes). Both own a worker pool and a submission
/// loop; what differs is only where events come from.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Starts the trigger's background loop. Returns once the loop has been
    /// spawned, not once it exits.
    async fn start(self: Arc<Self>) -> Result<(), TriggerError>;

    /// Signals the trigger to stop and waits for in-flight work to drain.
    async fn stop(&self) -> Result<(), TriggerError>;

    fn statistics(&self) -> TriggerStatisticsSnapshot;
}
