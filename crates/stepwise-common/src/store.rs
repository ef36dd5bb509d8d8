use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::Result;
use crate::types::ExecutionRecord;

/// Failure modes of the shared record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The uniqueness constraint on the sequence number rejected a write.
    #[error("sequence number {0} is already recorded")]
    UniqueViolation(u64),

    #[error("{0}")]
    Storage(String),
}

/// Persisted migration state shared by every process migrating the same target.
///
/// Implementations must reject a second `insert_execution_record` for the same
/// number with [`StoreError::UniqueViolation`] once
/// `ensure_unique_index_on_number` has succeeded.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn find_highest_applied_number(&self) -> std::result::Result<Option<u64>, StoreError>;

    async fn list_applied_numbers(&self) -> std::result::Result<BTreeSet<u64>, StoreError>;

    async fn insert_execution_record(
        &self,
        record: &ExecutionRecord,
    ) -> std::result::Result<(), StoreError>;

    async fn delete_execution_record(&self, num: u64) -> std::result::Result<(), StoreError>;

    /// Idempotent; safe to call before every run.
    async fn ensure_unique_index_on_number(&self) -> std::result::Result<(), StoreError>;

    /// Acknowledge a completed run.
    async fn save(&self) -> std::result::Result<(), StoreError> {
        Ok(())
    }
}

/// A target system that can run the body of a script migration.
#[async_trait]
pub trait ScriptTarget: Send + Sync {
    async fn execute_script(&self, script: &str) -> Result<()>;
}
