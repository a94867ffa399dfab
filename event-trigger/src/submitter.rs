use tracing::{debug, warn};

use crate::config::AckMode;
use crate::error::TriggerError;
use crate::worker::{AllocatedWorker, SubmittedEvent, WorkerResponse};

/// Outcome of submitting one event to a worker: whether the claim loop
/// should advance its commit point, and if not, why.
pub struct SubmitOutcome {
    pub should_commit: bool,
    pub response: Option<WorkerResponse>,
    pub error: Option<TriggerError>,
}

impl SubmitOutcome {
    fn committed(response: WorkerResponse) -> Self {
        Self {
            should_commit: true,
            response: Some(response),
            error: None,
        }
    }

    fn withheld(error: Option<TriggerError>) -> Self {
        Self {
            should_commit: false,
            response: None,
            error,
        }
    }
}

/// Applies the configured ack policy to one submission (§4.4). The source
/// hands submissions to a dedicated `eventSubmitter` goroutine connected to
/// the consume loop by an unbuffered channel, because a blocking worker call
/// would otherwise stall partition consumption on a single OS thread. A
/// tokio task already gets that concurrency for free — each claim runs on
/// its own task — so this submits directly rather than introducing a second
/// channel hop with nothing to decouple.
pub struct Submitter {
    ack_mode: AckMode,
}

impl Submitter {
    pub fn new(ack_mode: AckMode) -> Self {
        Self { ack_mode }
    }

    pub async fn submit(
        &self,
        allocated: &AllocatedWorker,
        event: &SubmittedEvent,
    ) -> SubmitOutcome {
        let result = allocated.worker().submit(event).await;
        match (self.ack_mode, result) {
            (AckMode::ExplicitOnly, Ok(response)) => {
                debug!("explicit-ack mode: withholding commit pending control bus ack");
                SubmitOutcome {
                    should_commit: false,
                    response: Some(response),
                    error: None,
                }
            }
            (AckMode::ExplicitOnly, Err(err)) => SubmitOutcome::withheld(Some(err)),
            (AckMode::Disable, Ok(response)) => SubmitOutcome::committed(response),
            (AckMode::Disable, Err(err)) => SubmitOutcome::withheld(Some(err)),
            (AckMode::Enable, Ok(response)) => {
                if response.is_no_ack() {
                    debug!("handler requested no-ack, withholding commit");
                    SubmitOutcome::withheld(Some(TriggerError::StreamNoAck))
                } else {
                    SubmitOutcome::committed(response)
                }
            }
            (AckMode::Enable, Err(err)) => {
                warn!(error = %err, "handler invocation failed");
                SubmitOutcome::withheld(Some(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{Message, Worker, WorkerPool};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc as StdArc;

    struct ScriptedWorker {
        fail: bool,
        no_ack: bool,
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn submit(&self, _event: &SubmittedEvent) -> Result<WorkerResponse, TriggerError> {
            if self.fail {
                return Err(TriggerError::HandlerFailed("boom".into()));
            }
            let mut response = WorkerResponse::default();
            if self.no_ack {
                response
                    .headers
                    .insert("x-nuclio-stream-no-ack".to_string(), Value::Bool(true));
            }
            Ok(response)
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

    fn event() -> SubmittedEvent {
        SubmittedEvent {
            message: Message {
                topic: "t".to_string(),
                partition: 0,
                offset: 1,
                key: None,
                value: None,
                headers: Vec::new(),
                timestamp_ms: None,
            },
        }
    }

    async fn allocated(worker: ScriptedWorker) -> AllocatedWorker {
        let pool = WorkerPool::new(vec![StdArc::new(worker) as StdArc<dyn Worker>]);
        pool.try_allocate("t", 0).unwrap()
    }

    #[tokio::test]
    async fn disable_mode_commits_on_success() {
        let submitter = Submitter::new(AckMode::Disable);
        let handle = allocated(ScriptedWorker {
            fail: false,
            no_ack: false,
        })
        .await;
        let outcome = submitter.submit(&handle, &event()).await;
        assert!(outcome.should_commit);
    }

    #[tokio::test]
    async fn disable_mode_withholds_on_failure() {
        let submitter = Submitter::new(AckMode::Disable);
        let handle = allocated(ScriptedWorker {
            fail: true,
            no_ack: false,
        })
        .await;
        let outcome = submitter.submit(&handle, &event()).await;
        assert!(!outcome.should_commit);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn enable_mode_respects_no_ack_header() {
        let submitter = Submitter::new(AckMode::Enable);
        let handle = allocated(ScriptedWorker {
            fail: false,
            no_ack: true,
        })
        .await;
        let outcome = submitter.submit(&handle, &event()).await;
        assert!(!outcome.should_commit);
        assert!(matches!(outcome.error, Some(TriggerError::StreamNoAck)));
    }

    #[tokio::test]
    async fn explicit_only_mode_never_auto_commits() {
        let submitter = Submitter::new(AckMode::ExplicitOnly);
        let handle = allocated(ScriptedWorker {
            fail: false,
            no_ack: false,
        })
        .await;
        let outcome = submitter.submit(&handle, &event()).await;
        assert!(!outcome.should_commit);
        assert!(outcome.response.is_some());
    }
}
