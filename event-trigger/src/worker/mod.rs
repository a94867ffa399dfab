pub mod pool;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TriggerError;

pub use pool::{AllocatedWorker, WorkerPool};

/// One received message handed to user code (§3, Message).
#[derive(Clone, Debug)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub timestamp_ms: Option<i64>,
}

/// The event handed to a worker: a message plus the worker it was routed to
/// (§3, Submitted event). Kept distinct from `Message` because the
/// submitter reuses one instance of this per claim.
#[derive(Clone, Debug)]
pub struct SubmittedEvent {
    pub message: Message,
}

/// Opaque response shape coming back from user code. Response headers are
/// inspected uniformly regardless of how the embedder's worker produced
/// them (§9 Design Notes, no-ack header inspection).
#[derive(Clone, Debug, Default)]
pub struct WorkerResponse {
    pub headers: HashMap<String, Value>,
}

impl WorkerResponse {
    pub fn is_no_ack(&self) -> bool {
        matches!(
            self.headers.get("x-nuclio-stream-no-ack"),
            Some(Value::Bool(true))
        )
    }
}

/// A single execution slot wrapping opaque user-code invocation (§4.1).
#[async_trait]
pub trait Worker: Send + Sync {
    async fn submit(&self, event: &SubmittedEvent) -> Result<WorkerResponse, TriggerError>;
    async fn restart(&self) -> Result<(), TriggerError>;
    async fn terminate(&self) -> Result<(), TriggerError>;
    fn supports_restart(&self) -> bool;
    fn is_terminated(&self) -> bool;
    fn index(&self) -> usize;
}
