//! Top-level pipeline: discover, validate, select, check, lock, execute.

use std::collections::BTreeSet;

use stepwise_common::{Direction, Error, Result, StateStore};
use tracing::{debug, info};

use crate::consistency::{MissedPolicy, check_consistency};
use crate::engine::{Engine, EventHook, RunReport, RunSet};
use crate::lock::LockCoordinator;
use crate::migration::MigrationLoader;
use crate::plan::{order_runnable, validate};
use crate::source::{Candidate, MigrationSource};
use crate::target::resolve_target;

/// Parameters for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateOptions {
    pub direction: Direction,
    pub target: Option<u64>,
    pub policy: MissedPolicy,
}

impl MigrateOptions {
    pub fn up() -> Self {
        Self {
            direction: Direction::Up,
            target: None,
            policy: MissedPolicy::default(),
        }
    }

    pub fn down() -> Self {
        Self {
            direction: Direction::Down,
            ..Self::up()
        }
    }

    pub fn with_target(mut self, target: Option<u64>) -> Self {
        self.target = target;
        self
    }

    pub fn with_policy(mut self, policy: MissedPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// What a run would do, computed before anything touches the target.
#[derive(Debug, Clone)]
pub struct Plan {
    pub direction: Direction,
    pub last_applied: Option<u64>,
    pub all_numbers: BTreeSet<u64>,
    pub applied: BTreeSet<u64>,
    pub to_run: Vec<Candidate>,
}

pub struct Migrator<'a, T: ?Sized, S: ?Sized> {
    source: MigrationSource,
    target: &'a T,
    store: &'a S,
    loader: &'a dyn MigrationLoader<T>,
    hook: Option<EventHook>,
}

impl<'a, T, S> Migrator<'a, T, S>
where
    T: ?Sized + Sync,
    S: StateStore + ?Sized,
{
    pub fn new(
        source: MigrationSource,
        target: &'a T,
        store: &'a S,
        loader: &'a dyn MigrationLoader<T>,
    ) -> Self {
        Self {
            source,
            target,
            store,
            loader,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: EventHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Select the migrations to run and verify nothing would be skipped.
    pub async fn plan(&self, options: &MigrateOptions) -> Result<Plan> {
        let last_applied = self
            .store
            .find_highest_applied_number()
            .await
            .map_err(|e| Error::Persistence(format!("failed to read last applied migration: {e}")))?;
        debug!("last applied migration: {last_applied:?}");

        let validated = validate(self.source.scan()?)?;
        let ordered = order_runnable(&validated.candidates, last_applied, options.direction);
        let to_run = resolve_target(ordered, options.direction, options.target)?;

        let applied = self
            .store
            .list_applied_numbers()
            .await
            .map_err(|e| Error::Persistence(format!("failed to list applied migrations: {e}")))?;
        let to_run_numbers: BTreeSet<u64> = to_run.iter().map(|c| c.num).collect();
        let horizon = options
            .policy
            .horizon(options.direction, options.target, last_applied);
        check_consistency(&validated.all_numbers, &to_run_numbers, &applied, horizon)?;

        Ok(Plan {
            direction: options.direction,
            last_applied,
            all_numbers: validated.all_numbers,
            applied,
            to_run,
        })
    }

    pub async fn run(&self, options: MigrateOptions) -> Result<RunReport> {
        let plan = self.plan(&options).await?;
        LockCoordinator::new(self.store).ensure_lock_index().await?;

        // Load every selected file up front so a broken one fails before any runs.
        let migrations = plan
            .to_run
            .iter()
            .map(|candidate| self.loader.load(candidate))
            .collect::<Result<Vec<_>>>()?;

        if migrations.is_empty() {
            info!("no migrations to run {}", options.direction);
        }

        let mut run_set = RunSet::new(options.direction, migrations);
        let mut engine = Engine::new(self.target, self.store);
        if let Some(hook) = &self.hook {
            engine = engine.with_hook(hook.clone());
        }
        engine.run(&mut run_set).await
    }
}
