//! Detection of migrations that exist on disk but were skipped.

use std::collections::BTreeSet;

use stepwise_common::{Direction, Error, Result};
use tracing::error;

/// How strictly unapplied, unselected migrations are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissedPolicy {
    /// Every discovered number must be applied already or about to run.
    #[default]
    Strict,
    /// Numbers beyond the run's horizon are pending, not missed. The horizon
    /// is the explicit target going up and the last applied number going down.
    IgnorePending,
}

impl MissedPolicy {
    /// Highest number the check applies to, or `None` for no limit.
    pub fn horizon(
        &self,
        direction: Direction,
        target: Option<u64>,
        last_applied: Option<u64>,
    ) -> Option<u64> {
        match self {
            MissedPolicy::Strict => None,
            MissedPolicy::IgnorePending => match direction {
                Direction::Up => target,
                Direction::Down => Some(last_applied.unwrap_or(0)),
            },
        }
    }
}

/// `all - to_run - applied`, limited to numbers at or below `horizon`.
pub fn find_missed(
    all: &BTreeSet<u64>,
    to_run: &BTreeSet<u64>,
    applied: &BTreeSet<u64>,
    horizon: Option<u64>,
) -> Vec<u64> {
    all.iter()
        .copied()
        .filter(|num| !to_run.contains(num) && !applied.contains(num))
        .filter(|num| horizon.is_none_or(|h| *num <= h))
        .collect()
}

/// Fail with [`Error::MissedMigrations`] when any discovered migration would be skipped.
pub fn check_consistency(
    all: &BTreeSet<u64>,
    to_run: &BTreeSet<u64>,
    applied: &BTreeSet<u64>,
    horizon: Option<u64>,
) -> Result<()> {
    let missed = find_missed(all, to_run, applied, horizon);
    if missed.is_empty() {
        return Ok(());
    }
    error!("migrations on disk were never applied: {missed:?}");
    Err(Error::MissedMigrations(missed))
}
