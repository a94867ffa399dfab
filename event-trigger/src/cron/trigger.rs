use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cron::CronSchedule;
use crate::error::TriggerError;
use crate::stats::TriggerStatistics;
use crate::trigger::Trigger;
use crate::worker::{Message, SubmittedEvent, WorkerPool};

/// Abstracts wall-clock access so schedule tests can drive fake time instead
/// of racing the real clock (§6).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fires a synthetic event on a fixed interval or calendar schedule instead
/// of consuming a partitioned log, but otherwise shares the same worker pool
/// and submission contract as the streaming trigger (§6).
pub struct CronTrigger {
    schedule: CronSchedule,
    fire_missed_ticks: bool,
    pool: WorkerPool,
    clock: Arc<dyn Clock>,
    stats: Arc<TriggerStatistics>,
    last_run_ms: AtomicI64,
    shutdown: watch::Sender<bool>,
}

impl CronTrigger {
    pub fn new(schedule: CronSchedule, fire_missed_ticks: bool, pool: WorkerPool) -> Self {
        Self::with_clock(schedule, fire_missed_ticks, pool, Arc::new(SystemClock))
    }

    pub fn with_clock(
        schedule: CronSchedule,
        fire_missed_ticks: bool,
        pool: WorkerPool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let now = clock.now();
        Self {
            schedule,
            fire_missed_ticks,
            pool,
            clock,
            stats: Arc::new(TriggerStatistics::default()),
            last_run_ms: AtomicI64::new(now.timestamp_millis()),
            shutdown,
        }
    }

    fn last_run(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_run_ms.load(Ordering::Acquire))
            .unwrap_or_else(|| self.clock.now())
    }

    async fn fire_one(&self) {
        let handle = match self.pool.try_allocate("cron", 0) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "no worker available for scheduled fire, skipping tick");
                self.stats.record_failure();
                return;
            }
        };
        let event = SubmittedEvent {
            message: Message {
                topic: "cron".to_string(),
                partition: 0,
                offset: 0,
                key: None,
                value: None,
                headers: Vec::new(),
                timestamp_ms: Some(self.clock.now().timestamp_millis()),
            },
        };
        match handle.worker().submit(&event).await {
            Ok(_) => self.stats.record_success(),
            Err(err) => {
                warn!(error = %err, "scheduled handler invocation failed");
                self.stats.record_failure();
            }
        }
        handle.release();
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let now = self.clock.now();
            let last_run = self.last_run();

            if self.fire_missed_ticks {
                let missed = self.schedule.missed_ticks(last_run, now);
                for _ in 0..missed {
                    self.fire_one().await;
                }
            }

            let delay = self.schedule.next_submit_delay(self.last_run(), self.clock.now());
            self.last_run_ms
                .store(self.clock.now().timestamp_millis(), Ordering::Release);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.fire_one().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron trigger stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Trigger for CronTrigger {
    async fn start(self: Arc<Self>) -> Result<(), TriggerError> {
        let shutdown_rx = self.shutdown.subscribe();
        let this = self.clone();
        tokio::spawn(async move { this.run_loop(shutdown_rx).await });
        Ok(())
    }

    async fn stop(&self) -> Result<(), TriggerError> {
        let _ = self.shutdown.send(true);
        Ok(())
    }

    fn statistics(&self) -> crate::stats::TriggerStatisticsSnapshot {
        self.stats.snapshot()
    }
}
