use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("no worker available for {topic}/{partition}")]
    NoWorkerAvailable { topic: String, partition: i32 },

    #[error("handler failed: {0}")]
    HandlerFailed(String),

    #[error("stream no-ack requested by handler")]
    StreamNoAck,

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    #[error("failed to decode control message: {0}")]
    ControlDecode(String),

    #[error("trigger is shutting down")]
    ShuttingDown,

    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl TriggerError {
    /// Handler-completion errors that must suppress the commit for this
    /// cycle without tearing anything down (ack-mode handling).
    pub fn suppresses_commit(&self) -> bool {
        matches!(
            self,
            TriggerError::HandlerFailed(_) | TriggerError::StreamNoAck
        )
    }
}
