use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::broker::{ControlBus, ControlMessageKind, Session};
use crate::stats::TriggerStatistics;

/// Out-of-band ack loop for `AckMode::ExplicitOnly` (§4.4/§4.5). Commits are
/// driven entirely by control messages here; the stream trigger's own
/// submission path never marks an offset while this mode is active (see
/// `Submitter`).
///
/// Grounded on the source's `explicitAckHandler`: a session-scoped
/// subscription that is rebuilt on every rebalance, since marking an offset
/// against a session from a previous generation would be meaningless (the
/// partition may no longer be ours).
pub struct ExplicitAckHandler {
    control_bus: Arc<dyn ControlBus>,
    current_session: Arc<Mutex<Option<Arc<dyn Session>>>>,
    stats: Arc<TriggerStatistics>,
}

impl ExplicitAckHandler {
    pub fn new(control_bus: Arc<dyn ControlBus>, stats: Arc<TriggerStatistics>) -> Self {
        Self {
            control_bus,
            current_session: Arc::new(Mutex::new(None)),
            stats,
        }
    }

    /// Called from `setup`/`cleanup` so the handler always commits against
    /// the generation that is actually live.
    pub async fn set_session(&self, session: Option<Arc<dyn Session>>) {
        *self.current_session.lock().await = session;
    }

    /// Runs until the control bus closes. Intended to be spawned once for
    /// the life of the trigger, independent of rebalances.
    pub async fn run(&self) {
        while let Some(message) = self.control_bus.recv().await {
            match message.kind {
                ControlMessageKind::StreamMessageAck => {
                    let session = self.current_session.lock().await.clone();
                    match session {
                        Some(session) => {
                            debug!(
                                topic = message.topic,
                                partition = message.partition,
                                offset = message.offset,
                                "explicit ack received"
                            );
                            session.mark_offset(
                                &message.topic,
                                message.partition,
                                message.offset.saturating_add(1),
                            );
                            self.stats.record_commit();
                        }
                        None => {
                            warn!(
                                topic = message.topic,
                                partition = message.partition,
                                "explicit ack received with no active session, dropping"
                            );
                        }
                    }
                }
            }
        }
    }
}
