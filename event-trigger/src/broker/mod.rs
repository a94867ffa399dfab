pub mod rdkafka_client;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::error::TriggerError;
use crate::worker::Message;

pub use rdkafka_client::RdKafkaClient;

/// Runs the consumer-group protocol against a broker and drives a handler
/// through its session lifecycle (§3, §5). Exists so the trigger core never
/// talks to `rdkafka` directly, which keeps the rebalance/session machinery
/// swappable and unit-testable behind a fake.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Joins the consumer group and runs until cancelled, re-entering
    /// `setup`/`consume_claim`/`cleanup` across every rebalance (§5).
    async fn run(
        &self,
        handler: Arc<dyn ConsumerGroupHandler>,
        topics: &[String],
    ) -> Result<(), TriggerError>;

    async fn close(&self) -> Result<(), TriggerError>;
}

/// Callbacks invoked across one generation of group membership. Mirrors the
/// source's `Setup`/`Cleanup`/`ConsumeClaim` session hooks.
#[async_trait]
pub trait ConsumerGroupHandler: Send + Sync {
    async fn setup(&self, session: Arc<dyn Session>) -> Result<(), TriggerError>;
    async fn cleanup(&self, session: Arc<dyn Session>) -> Result<(), TriggerError>;
    async fn consume_claim(
        &self,
        session: Arc<dyn Session>,
        claim: Box<dyn Claim>,
    ) -> Result<(), TriggerError>;
}

/// One generation of group membership: the set of claimed partitions plus
/// the means to record progress against them (§5).
pub trait Session: Send + Sync {
    fn claims(&self) -> HashMap<String, Vec<i32>>;
    fn member_id(&self) -> &str;
    fn generation_id(&self) -> i32;

    /// Records that `offset` (and everything before it, subject to the ack
    /// window) is safe to resume from. Does not itself talk to the broker;
    /// the underlying client batches and flushes these on its own cadence.
    fn mark_offset(&self, topic: &str, partition: i32, offset: i64);

    /// Cancelled the moment this generation's partitions start being
    /// revoked, letting `consume_claim` loops blocked on `next_message`
    /// wake up and return immediately instead of waiting for their channel
    /// to drain and close on its own.
    fn cancellation_token(&self) -> CancellationToken;
}

/// A single claimed partition's message stream (§3, §5).
#[async_trait]
pub trait Claim: Send {
    fn topic(&self) -> &str;
    fn partition(&self) -> i32;

    /// Returns the next message, or `None` once the claim has been revoked
    /// and its stream drained.
    async fn next_message(&mut self) -> Option<Message>;
}

/// Out-of-band bus for explicit-ack control messages (§4.4/§4.5). Decoupled
/// from `BrokerClient` because, unlike the consumer group protocol, nothing
/// about this bus is specific to the data broker: it could as easily be a
/// different topic, an HTTP callback, or an in-process channel in tests.
#[async_trait]
pub trait ControlBus: Send + Sync {
    async fn recv(&self) -> Option<ControlMessage>;
}

#[derive(Clone, Debug)]
pub struct ControlMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub kind: ControlMessageKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMessageKind {
    StreamMessageAck,
}

/// `ControlBus` backed by a `tokio::sync::broadcast` channel, the concrete
/// in-process adapter for the opaque embedder-supplied control-message bus
/// (§4.5). `new` hands back the sender half so anything in the same process
/// (an HTTP handler, another task) can publish acks without depending on
/// this module's trait object.
pub struct BroadcastControlBus {
    rx: AsyncMutex<broadcast::Receiver<ControlMessage>>,
}

impl BroadcastControlBus {
    pub fn new(capacity: usize) -> (broadcast::Sender<ControlMessage>, Self) {
        let (tx, rx) = broadcast::channel(capacity);
        (tx, Self { rx: AsyncMutex::new(rx) })
    }
}

#[async_trait]
impl ControlBus for BroadcastControlBus {
    async fn recv(&self) -> Option<ControlMessage> {
        loop {
            match self.rx.lock().await.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
