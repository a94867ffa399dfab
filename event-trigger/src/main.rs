use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::{routing::get, routing::post, Json, Router};
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use event_trigger::broker::{BroadcastControlBus, ControlBus, ControlMessage, ControlMessageKind, RdKafkaClient};
use event_trigger::config::{AckMode, CronConfig, TriggerConfig};
use event_trigger::cron::CronSchedule;
use event_trigger::worker::{SubmittedEvent, Worker, WorkerPool, WorkerResponse};
use event_trigger::{CronTrigger, StreamTrigger, Trigger, TriggerError};
use health::HealthRegistry;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

common_alloc::used!();

/// Default worker runtime logging every delivered message. Real embedders
/// supply their own `Worker`, dispatching into whatever runtime they host
/// (HTTP handler, WASM module, embedded script); this one exists so the
/// binary is runnable standalone.
struct LoggingWorker {
    index: usize,
}

#[async_trait::async_trait]
impl Worker for LoggingWorker {
    async fn submit(&self, event: &SubmittedEvent) -> Result<WorkerResponse, TriggerError> {
        debug!(
            worker = self.index,
            topic = event.message.topic,
            partition = event.message.partition,
            offset = event.message.offset,
            "delivered message"
        );
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
        self.index
    }
}

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().unwrap()),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "event trigger"
}

#[derive(Deserialize)]
pub struct AckRequest {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Entry point for `explicit_only` ack mode: an embedder (or, here, any HTTP
/// caller) posts the `(topic, partition, offset)` it has finished
/// processing and the control bus fans it to the live session's ack
/// handler (§4.5).
pub async fn ack(
    State(control_tx): State<broadcast::Sender<ControlMessage>>,
    Json(request): Json<AckRequest>,
) -> &'static str {
    let _ = control_tx.send(ControlMessage {
        topic: request.topic,
        partition: request.partition,
        offset: request.offset,
        kind: ControlMessageKind::StreamMessageAck,
    });
    "ok"
}

#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    setup_tracing();
    info!("starting event trigger core");

    let config = TriggerConfig::init_from_env()?;
    config.validate()?;
    let cron_config = CronConfig::init_from_env()?;

    info!(
        brokers = config.brokers,
        topics = ?config.topic_list(),
        group = config.consumer_group,
        allocation_mode = ?config.worker_allocation_mode,
        "configuration loaded"
    );

    let health_registry = HealthRegistry::new("event-trigger");
    let startup_handle = health_registry
        .register("triggers".to_string(), Duration::from_secs(60))
        .await;
    startup_handle.report_healthy().await;

    let control_tx = if config.explicit_ack_mode == AckMode::ExplicitOnly {
        let (tx, bus) = BroadcastControlBus::new(config.channel_buffer_size);
        Some((tx, Arc::new(bus) as Arc<dyn ControlBus>))
    } else {
        None
    };

    let bind = format!("{}:{}", config.bind_host, config.bind_port);
    let health_router = Router::new()
        .route("/", get(index))
        .route(
            "/_readiness",
            get({
                let health_registry = health_registry.clone();
                move || ready(health_registry.get_status())
            }),
        )
        .route("/_liveness", get(|| ready("ok")));
    let health_router = match &control_tx {
        Some((tx, _)) => health_router.route("/ack", post(ack).with_state(tx.clone())),
        None => health_router,
    };
    let health_router = setup_metrics_routes(health_router);

    tokio::task::spawn(async move {
        serve(health_router, &bind)
            .await
            .expect("failed to start health server");
    });

    let worker_count = config.worker_pool_size;
    let workers: Vec<Arc<dyn Worker>> = (0..worker_count)
        .map(|index| Arc::new(LoggingWorker { index }) as Arc<dyn Worker>)
        .collect();
    let pool = WorkerPool::new(workers);

    let client = Arc::new(RdKafkaClient::new(&config)?);
    let control_bus = control_tx.map(|(_, bus)| bus);
    let stream_trigger = Arc::new(StreamTrigger::with_control_bus(
        config.clone(),
        pool.clone(),
        client,
        control_bus,
    ));
    stream_trigger.clone().start().await?;

    let schedule = CronSchedule::parse(&cron_config.schedule)?;
    let cron_trigger = Arc::new(CronTrigger::new(
        schedule,
        cron_config.fire_missed_ticks,
        pool,
    ));
    cron_trigger.clone().start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    stream_trigger.stop().await?;
    cron_trigger.stop().await?;

    info!("event trigger shut down");
    Ok(())
}
