use async_trait::async_trait;

use crate::allocator::PartitionAllocator;
use crate::error::TriggerError;
use crate::worker::{AllocatedWorker, WorkerPool};

/// Draws any free worker from the shared pool at message-arrival time.
/// Best when partitions outnumber workers (§4.2).
pub struct PooledAllocator {
    pool: WorkerPool,
}

impl PooledAllocator {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PartitionAllocator for PooledAllocator {
    async fn allocate(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<AllocatedWorker, TriggerError> {
        self.pool.try_allocate(topic, partition)
    }

    async fn stop(&self) -> Result<(), TriggerError> {
        Ok(())
    }
}
