pub mod ack;
pub mod allocator;
pub mod broker;
pub mod config;
pub mod cron;
pub mod error;
pub mod stats;
pub mod stream;
pub mod submitter;
pub mod trigger;
pub mod worker;

pub use config::{CronConfig, TriggerConfig};
pub use cron::CronTrigger;
pub use error::TriggerError;
pub use stream::StreamTrigger;
pub use trigger::Trigger;
pub use worker::WorkerPool;
