use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::ack::ExplicitAckHandler;
use crate::allocator::{build_allocator, PartitionAllocator};
use crate::broker::{BrokerClient, ConsumerGroupHandler, ControlBus, Session};
use crate::config::TriggerConfig;
use crate::error::TriggerError;
use crate::stats::{TriggerStatistics, TriggerStatisticsSnapshot};
use crate::submitter::Submitter;
use crate::trigger::Trigger;
use crate::worker::pool::restart_or_escalate;
use crate::worker::{SubmittedEvent, WorkerPool};

/// Drives a partitioned, replicated log through a worker pool with
/// at-least-once delivery (§4). Owns the broker client and reconstructs its
/// partition allocator on every rebalance generation via the
/// `ConsumerGroupHandler` hooks below.
pub struct StreamTrigger {
    config: TriggerConfig,
    pool: WorkerPool,
    submitter: Submitter,
    client: Arc<dyn BrokerClient>,
    allocator: Mutex<Option<Box<dyn PartitionAllocator>>>,
    stats: Arc<TriggerStatistics>,
    shutdown: watch::Sender<bool>,
    ack_handler: Option<Arc<ExplicitAckHandler>>,
}

impl StreamTrigger {
    pub fn new(config: TriggerConfig, pool: WorkerPool, client: Arc<dyn BrokerClient>) -> Self {
        Self::with_control_bus(config, pool, client, None)
    }

    /// `control_bus` is required when `config.explicit_ack_mode` is
    /// `ExplicitOnly`; a `None` bus in that mode means no offset for this
    /// stream ever commits, which `StreamTrigger` allows rather than
    /// rejects, since a caller exercising only the submission path in tests
    /// has no need to wire a bus.
    pub fn with_control_bus(
        config: TriggerConfig,
        pool: WorkerPool,
        client: Arc<dyn BrokerClient>,
        control_bus: Option<Arc<dyn ControlBus>>,
    ) -> Self {
        let submitter = Submitter::new(config.explicit_ack_mode);
        let (shutdown, _) = watch::channel(false);
        let stats = Arc::new(TriggerStatistics::default());
        let ack_handler = control_bus.map(|bus| Arc::new(ExplicitAckHandler::new(bus, stats.clone())));
        Self {
            config,
            pool,
            submitter,
            client,
            allocator: Mutex::new(None),
            stats,
            shutdown,
            ack_handler,
        }
    }
}

#[async_trait]
impl ConsumerGroupHandler for StreamTrigger {
    async fn setup(&self, session: Arc<dyn Session>) -> Result<(), TriggerError> {
        info!(
            member = session.member_id(),
            generation = session.generation_id(),
            "session setup"
        );
        let claims = session.claims();
        let allocator = build_allocator(self.config.worker_allocation_mode, self.pool.clone(), &claims).await?;
        *self.allocator.lock().await = Some(allocator);
        if let Some(ack_handler) = &self.ack_handler {
            ack_handler.set_session(Some(session)).await;
        }
        Ok(())
    }

    async fn cleanup(&self, session: Arc<dyn Session>) -> Result<(), TriggerError> {
        info!(member = session.member_id(), "session cleanup");
        if let Some(allocator) = self.allocator.lock().await.take() {
            allocator.stop().await?;
        }
        if let Some(ack_handler) = &self.ack_handler {
            ack_handler.set_session(None).await;
        }
        Ok(())
    }

    async fn consume_claim(
        &self,
        session: Arc<dyn Session>,
        mut claim: Box<dyn crate::broker::Claim>,
    ) -> Result<(), TriggerError> {
        let topic = claim.topic().to_string();
        let partition = claim.partition();
        let drain_window = Duration::from_millis(self.config.max_wait_handler_during_rebalance_ms);
        let cancellation = session.cancellation_token();

        loop {
            let message = tokio::select! {
                message = claim.next_message() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = cancellation.cancelled() => {
                    info!(topic, partition, "session cancelled, ending claim loop");
                    break;
                }
            };
            let offset = message.offset;
            let allocator_guard = self.allocator.lock().await;
            let allocator = match allocator_guard.as_ref() {
                Some(allocator) => allocator,
                None => {
                    warn!(topic, partition, "no allocator for claim, dropping message");
                    continue;
                }
            };
            let handle = allocator.allocate(&topic, partition).await?;
            drop(allocator_guard);

            let event = SubmittedEvent { message };
            let outcome = match tokio::time::timeout(
                drain_window,
                self.submitter.submit(&handle, &event),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(topic, partition, offset, "handler did not complete within drain window");
                    restart_or_escalate(handle.worker()).await?;
                    self.stats.record_failure();
                    continue;
                }
            };

            match &outcome.error {
                Some(TriggerError::StreamNoAck) => {
                    self.stats.record_failure();
                    self.stats.record_dropped_no_ack();
                }
                Some(err) => {
                    warn!(topic, partition, offset, error = %err, "handler invocation failed");
                    self.stats.record_failure();
                }
                None => self.stats.record_success(),
            }

            if outcome.should_commit {
                let windowed = offset
                    .saturating_add(1)
                    .saturating_sub(self.config.ack_window_size as i64)
                    .max(0);
                session.mark_offset(&topic, partition, windowed);
                self.stats.record_commit();
            }

            handle.release();
        }
        Ok(())
    }
}

#[async_trait]
impl Trigger for StreamTrigger {
    async fn start(self: Arc<Self>) -> Result<(), TriggerError> {
        let topics = self.config.topic_list();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match this.client.run(this.clone(), &topics).await {
                    Ok(()) => break,
                    Err(TriggerError::ShuttingDown) => {
                        info!("stream trigger stopped");
                        break;
                    }
                    Err(TriggerError::Connectivity(message)) => {
                        warn!(error = %message, "lost connectivity to broker, retrying in 1s");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    Err(err) => {
                        warn!(error = %err, "stream trigger loop exited with error");
                        break;
                    }
                }
            }
        });
        if let Some(ack_handler) = self.ack_handler.clone() {
            tokio::spawn(async move { ack_handler.run().await });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), TriggerError> {
        let _ = self.shutdown.send(true);
        self.client.close().await
    }

    fn statistics(&self) -> TriggerStatisticsSnapshot {
        self.stats.snapshot()
    }
}
