use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use event_trigger::broker::{BrokerClient, Claim, ConsumerGroupHandler, Session};
use event_trigger::config::{AckMode, OAuthConfig, SaslConfig, TlsConfig, TriggerConfig, WorkerAllocationMode};
use event_trigger::worker::{Message, SubmittedEvent, Worker, WorkerPool, WorkerResponse};
use event_trigger::{StreamTrigger, TriggerError};
use tokio::sync::mpsc;

struct EchoWorker(usize);

#[async_trait]
impl Worker for EchoWorker {
    async fn submit(&self, _event: &SubmittedEvent) -> Result<WorkerResponse, TriggerError> {
        Ok(WorkerResponse::default())
    }
    async fn restart(&self) -> Result<(), TriggerError> {
        Ok(())
    }
    async fn terminate(&self) -> Result<(), TriggerError> {
        Ok(())
    }
    fn supports_restart(&self) -> bool {
        true
    }
    fn is_terminated(&self) -> bool {
        false
    }
    fn index(&self) -> usize {
        self.0
    }
}

/// Records whatever offset it is given, the same way the production
/// `rdkafka` adapter stores verbatim: ack-window arithmetic happens in the
/// consume loop before `mark_offset` is ever called.
struct WindowedSession {
    claims: HashMap<String, Vec<i32>>,
    committed: Mutex<Vec<i64>>,
}

impl Session for WindowedSession {
    fn claims(&self) -> HashMap<String, Vec<i32>> {
        self.claims.clone()
    }
    fn member_id(&self) -> &str {
        "test"
    }
    fn generation_id(&self) -> i32 {
        1
    }
    fn mark_offset(&self, _topic: &str, _partition: i32, offset: i64) {
        self.committed.lock().unwrap().push(offset);
    }
    fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        tokio_util::sync::CancellationToken::new()
    }
}

struct ChannelClaim {
    topic: String,
    partition: i32,
    rx: mpsc::Receiver<Message>,
}

#[async_trait]
impl Claim for ChannelClaim {
    fn topic(&self) -> &str {
        &self.topic
    }
    fn partition(&self) -> i32 {
        self.partition
    }
    async fn next_message(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

struct NoopClient;

#[async_trait]
impl BrokerClient for NoopClient {
    async fn run(
        &self,
        _handler: Arc<dyn ConsumerGroupHandler>,
        _topics: &[String],
    ) -> Result<(), TriggerError> {
        Ok(())
    }
    async fn close(&self) -> Result<(), TriggerError> {
        Ok(())
    }
}

fn test_config(ack_window_size: u64) -> TriggerConfig {
    TriggerConfig {
        brokers: "localhost:9092".to_string(),
        topics: "t".to_string(),
        consumer_group: "test-group".to_string(),
        session_timeout_ms: 10000,
        heartbeat_interval_ms: 3000,
        rebalance_timeout_ms: 60000,
        rebalance_retry_max: 4,
        retry_backoff_ms: 100,
        max_wait_time_ms: 250,
        fetch_min: 1,
        fetch_default: 1048576,
        fetch_max: 52428800,
        channel_buffer_size: 256,
        initial_offset: "earliest".to_string(),
        worker_allocation_mode: WorkerAllocationMode::Pool,
        ack_window_size,
        explicit_ack_mode: AckMode::Disable,
        max_wait_handler_during_rebalance_ms: 5000,
        version: "".to_string(),
        worker_pool_size: 4,
        tls: TlsConfig {
            enable: false,
            minimum_version: "1.2".to_string(),
            insecure_skip_verify: false,
            ca_cert: "".to_string(),
            access_key: "".to_string(),
            access_certificate: "".to_string(),
        },
        sasl: SaslConfig {
            enable: false,
            user: "".to_string(),
            password: "".to_string(),
            mechanism: "PLAIN".to_string(),
            handshake: true,
            oauth: OAuthConfig {
                client_id: "".to_string(),
                client_secret: "".to_string(),
                token_url: "".to_string(),
                scopes: "".to_string(),
            },
        },
        bind_host: "::".to_string(),
        bind_port: 8090,
    }
}

/// End-to-end scenario from the ack-window commit-lag property: consuming
/// offsets 0..9 with `ackWindowSize = 3` must request commits at the
/// clamped, windowed sequence {0,0,0,1,2,3,4,5,6,7}.
#[tokio::test]
async fn ack_window_commit_lag_matches_literal_scenario() {
    let config = test_config(3);
    let pool = WorkerPool::new(vec![Arc::new(EchoWorker(0)) as Arc<dyn Worker>]);
    let client: Arc<dyn BrokerClient> = Arc::new(NoopClient);
    let trigger = StreamTrigger::new(config, pool, client);

    let mut claims = HashMap::new();
    claims.insert("t".to_string(), vec![0]);
    let session = Arc::new(WindowedSession {
        claims: claims.clone(),
        committed: Mutex::new(Vec::new()),
    });
    let session_dyn: Arc<dyn Session> = session.clone();
    trigger.setup(session_dyn.clone()).await.unwrap();

    let (tx, rx) = mpsc::channel(16);
    for offset in 0..10i64 {
        tx.send(Message {
            topic: "t".to_string(),
            partition: 0,
            offset,
            key: None,
            value: None,
            headers: Vec::new(),
            timestamp_ms: None,
        })
        .await
        .unwrap();
    }
    drop(tx);

    let claim: Box<dyn Claim> = Box::new(ChannelClaim {
        topic: "t".to_string(),
        partition: 0,
        rx,
    });
    trigger.consume_claim(session_dyn, claim).await.unwrap();

    let committed = session.committed.lock().unwrap().clone();
    assert_eq!(committed, vec![0, 0, 0, 1, 2, 3, 4, 5, 6, 7]);
}

/// FIFO per partition: offsets must have been observed (and therefore
/// committed, since every handler here succeeds) in strictly increasing
/// order, never reordered by worker scheduling.
#[tokio::test]
async fn fifo_per_partition_preserves_offset_order() {
    let config = test_config(0);
    let pool = WorkerPool::new(vec![
        Arc::new(EchoWorker(0)) as Arc<dyn Worker>,
        Arc::new(EchoWorker(1)) as Arc<dyn Worker>,
    ]);
    let client: Arc<dyn BrokerClient> = Arc::new(NoopClient);
    let trigger = StreamTrigger::new(config, pool, client);

    let mut claims = HashMap::new();
    claims.insert("t".to_string(), vec![0]);
    let session = Arc::new(WindowedSession {
        claims,
        committed: Mutex::new(Vec::new()),
    });
    let session_dyn: Arc<dyn Session> = session.clone();
    trigger.setup(session_dyn.clone()).await.unwrap();

    let (tx, rx) = mpsc::channel(16);
    for offset in 0..20i64 {
        tx.send(Message {
            topic: "t".to_string(),
            partition: 0,
            offset,
            key: None,
            value: None,
            headers: Vec::new(),
            timestamp_ms: None,
        })
        .await
        .unwrap();
    }
    drop(tx);

    let claim: Box<dyn Claim> = Box::new(ChannelClaim {
        topic: "t".to_string(),
        partition: 0,
        rx,
    });
    trigger.consume_claim(session_dyn, claim).await.unwrap();

    let committed = session.committed.lock().unwrap().clone();
    let expected: Vec<i64> = (0..20).collect();
    assert_eq!(committed, expected);
}

/// No commit on failure: a handler that always errors must never advance
/// the commit point.
#[tokio::test]
async fn failed_handler_never_commits() {
    struct FailingWorker;

    #[async_trait]
    impl Worker for FailingWorker {
        async fn submit(&self, _event: &SubmittedEvent) -> Result<WorkerResponse, TriggerError> {
            Err(TriggerError::HandlerFailed("boom".to_string()))
        }
        async fn restart(&self) -> Result<(), TriggerError> {
            Ok(())
        }
        async fn terminate(&self) -> Result<(), TriggerError> {
            Ok(())
        }
        fn supports_restart(&self) -> bool {
            true
        }
        fn is_terminated(&self) -> bool {
            false
        }
        fn index(&self) -> usize {
            0
        }
    }

    let config = test_config(0);
    let pool = WorkerPool::new(vec![Arc::new(FailingWorker) as Arc<dyn Worker>]);
    let client: Arc<dyn BrokerClient> = Arc::new(NoopClient);
    let trigger = StreamTrigger::new(config, pool, client);

    let mut claims = HashMap::new();
    claims.insert("t".to_string(), vec![0]);
    let session = Arc::new(WindowedSession {
        claims,
        committed: Mutex::new(Vec::new()),
    });
    let session_dyn: Arc<dyn Session> = session.clone();
    trigger.setup(session_dyn.clone()).await.unwrap();

    let (tx, rx) = mpsc::channel(4);
    tx.send(Message {
        topic: "t".to_string(),
        partition: 0,
        offset: 5,
        key: None,
        value: None,
        headers: Vec::new(),
        timestamp_ms: None,
    })
    .await
    .unwrap();
    drop(tx);

    let claim: Box<dyn Claim> = Box::new(ChannelClaim {
        topic: "t".to_string(),
        partition: 0,
        rx,
    });
    trigger.consume_claim(session_dyn, claim).await.unwrap();

    assert!(session.committed.lock().unwrap().is_empty());
}
