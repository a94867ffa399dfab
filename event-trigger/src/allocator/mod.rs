pub mod pooled;
pub mod static_alloc;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::WorkerAllocationMode;
use crate::error::TriggerError;
use crate::worker::{AllocatedWorker, WorkerPool};

pub use pooled::PooledAllocator;
pub use static_alloc::StaticAllocator;

/// Partition → worker allocation strategy (§4.2). Selection happens once at
/// session setup and is fixed for the life of the session.
#[async_trait]
pub trait PartitionAllocator: Send + Sync {
    async fn allocate(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<AllocatedWorker, TriggerError>;

    /// Stops the allocator, returning any statically-bound workers to the
    /// shared pool. A no-op for the pooled strategy.
    async fn stop(&self) -> Result<(), TriggerError>;
}

/// Builds the configured allocator for a freshly assigned set of claims.
/// An unrecognized mode is already rejected when `WorkerAllocationMode` is
/// parsed from configuration, so every variant here is exhaustive.
pub async fn build_allocator(
    mode: WorkerAllocationMode,
    pool: WorkerPool,
    claims: &HashMap<String, Vec<i32>>,
) -> Result<Box<dyn PartitionAllocator>, TriggerError> {
    match mode {
        WorkerAllocationMode::Pool => Ok(Box::new(PooledAllocator::new(pool))),
        WorkerAllocationMode::Static => {
            Ok(Box::new(StaticAllocator::new(pool, claims).await?))
        }
    }
}
