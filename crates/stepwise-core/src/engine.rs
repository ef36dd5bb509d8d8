//! Sequential execution of a run set against the target and the record store.
//!
//! Each migration runs to completion before the next one starts. The first
//! failure is terminal: the failing migration gets exactly one compensating
//! call in the opposite direction (unless the failure was a lock conflict or a
//! record write), and the remaining queue is abandoned.

use std::collections::VecDeque;
use std::sync::Arc;

use stepwise_common::{Direction, Error, ExecutionRecord, Result, StateStore};
use tracing::{error, info, warn};

use crate::lock::LockCoordinator;
use crate::migration::Migration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Progress notifications emitted while a run set executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    Starting {
        direction: Direction,
        num: u64,
        title: String,
    },
    Finished {
        direction: Direction,
        num: u64,
        title: String,
    },
    /// A failed migration is being run in `direction` to undo it.
    Compensating {
        direction: Direction,
        num: u64,
        title: String,
    },
    Completed {
        direction: Direction,
        count: usize,
    },
    Saved,
}

pub type EventHook = Arc<dyn Fn(&MigrationEvent) + Send + Sync>;

/// The ordered queue of migrations selected for one invocation.
pub struct RunSet<T: ?Sized> {
    direction: Direction,
    queue: VecDeque<Migration<T>>,
    cursor: usize,
    state: RunState,
}

impl<T: ?Sized> RunSet<T> {
    pub fn new(direction: Direction, migrations: Vec<Migration<T>>) -> Self {
        Self {
            direction,
            queue: migrations.into(),
            cursor: 0,
            state: RunState::Idle,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Number of migrations finished so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Migrations still waiting to run.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub direction: Direction,
    /// Sequence numbers in the order they were applied or reverted.
    pub processed: Vec<u64>,
}

/// Drives a [`RunSet`] through `Idle -> Running -> Completed | Failed`.
pub struct Engine<'a, T: ?Sized, S: ?Sized> {
    target: &'a T,
    store: &'a S,
    hook: Option<EventHook>,
}

impl<'a, T, S> Engine<'a, T, S>
where
    T: ?Sized + Sync,
    S: StateStore + ?Sized,
{
    pub fn new(target: &'a T, store: &'a S) -> Self {
        Self {
            target,
            store,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: EventHook) -> Self {
        self.hook = Some(hook);
        self
    }

    fn emit(&self, event: MigrationEvent) {
        if let Some(hook) = &self.hook {
            hook(&event);
        }
    }

    pub async fn run(&self, run_set: &mut RunSet<T>) -> Result<RunReport> {
        if run_set.state != RunState::Idle {
            return Err(Error::Other(format!(
                "run set already {:?}",
                run_set.state
            )));
        }
        run_set.state = RunState::Running;
        let direction = run_set.direction;
        let mut processed = Vec::with_capacity(run_set.queue.len());

        while let Some(migration) = run_set.queue.pop_front() {
            let title = migration.title().to_string();
            info!("{direction} : {title}");
            self.emit(MigrationEvent::Starting {
                direction,
                num: migration.num(),
                title: title.clone(),
            });

            if let Err(e) = migration.run(direction, self.target).await {
                run_set.state = RunState::Failed;
                return Err(self.compensate(&migration, direction, e).await);
            }

            if let Err(e) = self.record(&migration, direction).await {
                run_set.state = RunState::Failed;
                error!("{e}");
                return Err(e);
            }

            run_set.cursor += 1;
            processed.push(migration.num());
            self.emit(MigrationEvent::Finished {
                direction,
                num: migration.num(),
                title,
            });
        }

        run_set.state = RunState::Completed;
        self.emit(MigrationEvent::Completed {
            direction,
            count: processed.len(),
        });

        if let Err(e) = self.store.save().await {
            run_set.state = RunState::Failed;
            return Err(Error::Persistence(format!("failed to save migration state: {e}")));
        }
        info!("migration : complete");
        self.emit(MigrationEvent::Saved);

        Ok(RunReport {
            direction,
            processed,
        })
    }

    async fn record(&self, migration: &Migration<T>, direction: Direction) -> Result<()> {
        match direction {
            Direction::Up => {
                let record = ExecutionRecord::new(migration.num(), migration.name());
                self.store
                    .insert_execution_record(&record)
                    .await
                    .map_err(|e| {
                        LockCoordinator::<S>::translate(e, migration.num(), migration.title())
                    })
            }
            Direction::Down => self
                .store
                .delete_execution_record(migration.num())
                .await
                .map_err(|e| {
                    Error::Persistence(format!(
                        "error removing migration {} from the database: {e}",
                        migration.title()
                    ))
                }),
        }
    }

    /// Run the failed migration once in the opposite direction and build the final error.
    async fn compensate(&self, migration: &Migration<T>, direction: Direction, err: Error) -> Error {
        let title = migration.title().to_string();
        error!("error inside migration {title}: {err}");

        let opposite = direction.opposite();
        warn!("reverting {title} by running it {opposite}");
        self.emit(MigrationEvent::Compensating {
            direction: opposite,
            num: migration.num(),
            title: title.clone(),
        });

        let compensation_error = match migration.run(opposite, self.target).await {
            Ok(()) => None,
            Err(e) => {
                error!("error migrating back {opposite}: {title}: {e}");
                error!("the database may be in a corrupted state, manual intervention is required");
                Some(e.to_string())
            }
        };

        Error::MigrationProcedure {
            title,
            reason: err.to_string(),
            compensation_error,
        }
    }
}
