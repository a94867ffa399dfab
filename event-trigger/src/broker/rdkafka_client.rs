use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message as _;
use rdkafka::topic_partition_list::TopicPartitionList;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{BrokerClient, Claim, ConsumerGroupHandler, Session};
use crate::config::TriggerConfig;
use crate::error::TriggerError;
use crate::worker::Message as TriggerMessage;

/// `ConsumerContext` implementation whose only job is to surface rebalance
/// events to the async run loop. `rdkafka` invokes these callbacks
/// synchronously from the poll thread, so they cannot themselves run the
/// handler's `setup`/`cleanup`; they just publish what happened.
struct RebalanceContext {
    events: watch::Sender<RebalanceEvent>,
}

#[derive(Clone, Debug, Default)]
enum RebalanceEvent {
    #[default]
    None,
    Assigned(TopicPartitionList),
    Revoked(TopicPartitionList),
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let owned: TopicPartitionList = (*tpl).clone();
            info!(partitions = owned.count(), "partitions revoked, entering cleanup");
            let _ = self.events.send(RebalanceEvent::Revoked(owned));
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(tpl) = rebalance {
            let owned: TopicPartitionList = (*tpl).clone();
            info!(partitions = owned.count(), "partitions assigned, entering setup");
            let _ = self.events.send(RebalanceEvent::Assigned(owned));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(err) = result {
            warn!(error = %err, "offset commit failed");
        }
    }
}

type TrackedConsumer = StreamConsumer<RebalanceContext>;

/// `BrokerClient` backed by `rdkafka`'s `StreamConsumer`. `rdkafka` exposes a
/// single interleaved message stream across every assigned partition rather
/// than sarama's per-partition claim channels, so this adapter fans that
/// stream back out into per-partition channels that `consume_claim` tasks
/// read from, restoring the claim-shaped API the handler is written against.
pub struct RdKafkaClient {
    consumer: Arc<TrackedConsumer>,
    rebalance_events: watch::Receiver<RebalanceEvent>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RdKafkaClient {
    pub fn new(config: &TriggerConfig) -> Result<Self, TriggerError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "heartbeat.interval.ms",
                config.heartbeat_interval_ms.to_string(),
            )
            .set("fetch.wait.max.ms", config.max_wait_time_ms.to_string())
            .set("fetch.min.bytes", config.fetch_min.to_string())
            .set("fetch.message.max.bytes", config.fetch_max.to_string())
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &config.initial_offset)
            .set("partition.assignment.strategy", "cooperative-sticky");

        if config.tls.enable {
            client_config
                .set("security.protocol", if config.sasl.enable { "SASL_SSL" } else { "SSL" })
                .set(
                    "enable.ssl.certificate.verification",
                    (!config.tls.insecure_skip_verify).to_string(),
                );
            if !config.tls.ca_cert.is_empty() {
                client_config.set("ssl.ca.location", &config.tls.ca_cert);
            }
        } else if config.sasl.enable {
            client_config.set("security.protocol", "SASL_PLAINTEXT");
        }

        if config.sasl.enable {
            client_config
                .set("sasl.mechanism", &config.sasl.mechanism)
                .set("sasl.username", &config.sasl.user)
                .set("sasl.password", &config.sasl.password);
        }

        let (tx, rx) = watch::channel(RebalanceEvent::None);
        let context = RebalanceContext { events: tx };
        let consumer: TrackedConsumer = client_config
            .create_with_context(context)
            .map_err(|err| TriggerError::Connectivity(err.to_string()))?;

        let (shutdown, shutdown_rx) = watch::channel(false);

        Ok(Self {
            consumer: Arc::new(consumer),
            rebalance_events: rx,
            shutdown,
            shutdown_rx,
        })
    }
}

#[async_trait]
impl BrokerClient for RdKafkaClient {
    async fn run(
        &self,
        handler: Arc<dyn ConsumerGroupHandler>,
        topics: &[String],
    ) -> Result<(), TriggerError> {
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topic_refs)
            .map_err(|err| TriggerError::Connectivity(err.to_string()))?;

        let mut rebalance_events = self.rebalance_events.clone();
        let mut shutdown = self.shutdown_rx.clone();
        let claim_routes: Arc<DashMap<(String, i32), mpsc::Sender<TriggerMessage>>> =
            Arc::new(DashMap::new());
        let mut current_session: Option<Arc<RdKafkaSession>> = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("broker client shutting down, leaving consumer group");
                        if let Some(session) = current_session.take() {
                            session.cancellation_token.cancel();
                            handler.cleanup(session).await?;
                        }
                        return Err(TriggerError::ShuttingDown);
                    }
                }
                changed = rebalance_events.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let event = rebalance_events.borrow_and_update().clone();
                    match event {
                        RebalanceEvent::Assigned(tpl) => {
                            let claims = tpl_to_claims(&tpl);
                            let session = Arc::new(RdKafkaSession::new(
                                self.consumer.clone(),
                                claims.clone(),
                            ));
                            handler.setup(session.clone()).await?;
                            for (topic, partition) in claims_iter(&claims) {
                                let (tx, rx) = mpsc::channel(256);
                                claim_routes.insert((topic.clone(), partition), tx);
                                let claim: Box<dyn Claim> =
                                    Box::new(RdKafkaClaim { topic, partition, rx });
                                let handler = handler.clone();
                                let session = session.clone() as Arc<dyn Session>;
                                tokio::spawn(async move {
                                    if let Err(err) = handler.consume_claim(session, claim).await {
                                        warn!(error = %err, "claim loop ended with error");
                                    }
                                });
                            }
                            current_session = Some(session);
                        }
                        RebalanceEvent::Revoked(tpl) => {
                            for (topic, partition) in tpl_to_pairs(&tpl) {
                                claim_routes.remove(&(topic, partition));
                            }
                            if let Some(session) = current_session.take() {
                                session.cancellation_token.cancel();
                                handler.cleanup(session).await?;
                            }
                        }
                        RebalanceEvent::None => {}
                    }
                }
                recv = self.consumer.recv() => {
                    match recv {
                        Ok(message) => {
                            let topic = message.topic().to_string();
                            let partition = message.partition();
                            let trigger_message = TriggerMessage {
                                topic: topic.clone(),
                                partition,
                                offset: message.offset(),
                                key: message.key().map(|k| k.to_vec()),
                                value: message.payload().map(|v| v.to_vec()),
                                headers: Vec::new(),
                                timestamp_ms: message.timestamp().to_millis(),
                            };
                            let route = claim_routes
                                .get(&(topic, partition))
                                .map(|entry| entry.value().clone());
                            if let Some(tx) = route {
                                let _ = tx.send(trigger_message).await;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "kafka receive error");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TriggerError> {
        let _ = self.shutdown.send(true);
        self.consumer.unsubscribe();
        Ok(())
    }
}

fn tpl_to_claims(tpl: &TopicPartitionList) -> HashMap<String, Vec<i32>> {
    let mut claims: HashMap<String, Vec<i32>> = HashMap::new();
    for elem in tpl.elements() {
        claims
            .entry(elem.topic().to_string())
            .or_default()
            .push(elem.partition());
    }
    claims
}

fn tpl_to_pairs(tpl: &TopicPartitionList) -> Vec<(String, i32)> {
    tpl.elements()
        .iter()
        .map(|e| (e.topic().to_string(), e.partition()))
        .collect()
}

fn claims_iter(claims: &HashMap<String, Vec<i32>>) -> impl Iterator<Item = (String, i32)> + '_ {
    claims
        .iter()
        .flat_map(|(topic, partitions)| partitions.iter().map(move |p| (topic.clone(), *p)))
}

struct RdKafkaSession {
    consumer: Arc<TrackedConsumer>,
    claims: HashMap<String, Vec<i32>>,
    cancellation_token: CancellationToken,
}

impl RdKafkaSession {
    fn new(consumer: Arc<TrackedConsumer>, claims: HashMap<String, Vec<i32>>) -> Self {
        Self {
            consumer,
            claims,
            cancellation_token: CancellationToken::new(),
        }
    }
}

impl Session for RdKafkaSession {
    fn claims(&self) -> HashMap<String, Vec<i32>> {
        self.claims.clone()
    }

    fn member_id(&self) -> &str {
        "rdkafka"
    }

    fn generation_id(&self) -> i32 {
        0
    }

    /// Stores `offset` verbatim. Callers are responsible for any ack-window
    /// arithmetic (§4.4 step c) before calling this; the consume loop and the
    /// explicit-ack handler each commit a different point relative to the
    /// message offset, so neither belongs here.
    fn mark_offset(&self, topic: &str, partition: i32, offset: i64) {
        if let Err(err) = self.consumer.store_offset(topic, partition, offset) {
            warn!(topic, partition, error = %err, "failed to store offset");
        }
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}

struct RdKafkaClaim {
    topic: String,
    partition: i32,
    rx: mpsc::Receiver<TriggerMessage>,
}

#[async_trait]
impl Claim for RdKafkaClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_message(&mut self) -> Option<TriggerMessage> {
        self.rx.recv().await
    }
}
