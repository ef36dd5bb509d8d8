use stepwise_common::{Error, Result, StateStore, StoreError};
use tracing::{debug, error};

/// Sets up and interprets the uniqueness constraint that serialises runs
/// across processes.
pub struct LockCoordinator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: StateStore + ?Sized> LockCoordinator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Make sure the store enforces one record per sequence number.
    pub async fn ensure_lock_index(&self) -> Result<()> {
        self.store
            .ensure_unique_index_on_number()
            .await
            .map_err(|e| {
                error!("failed to ensure lock index: {e}");
                Error::IndexCreation(e.to_string())
            })?;
        debug!("lock index in place");
        Ok(())
    }

    /// Map a failed record write to the run-level error.
    pub fn translate(err: StoreError, num: u64, title: &str) -> Error {
        match err {
            StoreError::UniqueViolation(_) => Error::MigrationLocked {
                num,
                title: title.to_string(),
            },
            StoreError::Storage(msg) => {
                Error::Persistence(format!("error saving migration run {title}: {msg}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_db::SqliteStateStore;

    #[tokio::test]
    async fn ensure_lock_index_creates_index_once() {
        let store = SqliteStateStore::in_memory().unwrap();
        let coordinator = LockCoordinator::new(&store);
        coordinator.ensure_lock_index().await.unwrap();
        coordinator.ensure_lock_index().await.unwrap();
        assert!(store.lock_index_exists().unwrap());
    }

    #[test]
    fn unique_violation_becomes_locked() {
        let err = LockCoordinator::<SqliteStateStore>::translate(
            StoreError::UniqueViolation(10),
            10,
            "migrations/0010-c.sql",
        );
        assert!(matches!(err, Error::MigrationLocked { num: 10, .. }));
    }

    #[test]
    fn storage_failure_becomes_persistence_error() {
        let err = LockCoordinator::<SqliteStateStore>::translate(
            StoreError::Storage("disk full".into()),
            10,
            "migrations/0010-c.sql",
        );
        match err {
            Error::Persistence(msg) => assert!(msg.contains("disk full")),
            other => panic!("expected Persistence, got {other:?}"),
        }
    }
}
