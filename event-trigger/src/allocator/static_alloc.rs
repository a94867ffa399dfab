use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::future::join_all;

use crate::allocator::PartitionAllocator;
use crate::error::TriggerError;
use crate::worker::pool::Cookie;
use crate::worker::{AllocatedWorker, WorkerPool};

/// Binds one worker per claimed partition for the life of the session
/// (§4.2). Best when a partition's ordering guarantees should extend across
/// every message it produces, not just the one currently in flight.
///
/// The real pool allocation is held here, not in the handles `allocate`
/// hands out: those are `AllocatedWorker::pinned` stand-ins whose `Drop` is
/// a no-op, so a claim releasing its per-message handle never returns the
/// worker to the shared pool early. Only `stop` does that, by dropping the
/// real guards.
pub struct StaticAllocator {
    bindings: Mutex<HashMap<(String, i32), AllocatedWorker>>,
}

impl StaticAllocator {
    pub async fn new(
        pool: WorkerPool,
        claims: &HashMap<String, Vec<i32>>,
    ) -> Result<Self, TriggerError> {
        let keys: Vec<(String, i32)> = claims
            .iter()
            .flat_map(|(topic, partitions)| partitions.iter().map(move |p| (topic.clone(), *p)))
            .collect();
        let guards = join_all(keys.iter().map(|_| pool.allocate_blocking())).await;
        let bindings = keys.into_iter().zip(guards).collect();
        Ok(Self {
            bindings: Mutex::new(bindings),
        })
    }
}

#[async_trait]
impl PartitionAllocator for StaticAllocator {
    async fn allocate(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<AllocatedWorker, TriggerError> {
        let bindings = self
            .bindings
            .lock()
            .expect("static allocator bindings mutex poisoned");
        let bound = bindings
            .get(&(topic.to_string(), partition))
            .ok_or_else(|| TriggerError::NoWorkerAvailable {
                topic: topic.to_string(),
                partition,
            })?;
        Ok(AllocatedWorker::pinned(
            bound.worker().clone(),
            Cookie(bound.cookie().0),
        ))
    }

    async fn stop(&self) -> Result<(), TriggerError> {
        let mut bindings = self
            .bindings
            .lock()
            .expect("static allocator bindings mutex poisoned");
        bindings.clear();
        Ok(())
    }
}
