use stepwise_common::{Direction, Error, Result};
use tracing::debug;

use crate::source::Candidate;

/// Narrow an ordered runnable list to the migrations needed to reach `target`.
///
/// Going up, the target itself is the last migration applied. Going down, the
/// target is the first migration left in place, so only numbers above it are
/// reverted. The target must be one of the runnable candidates.
pub fn resolve_target(
    ordered: Vec<Candidate>,
    direction: Direction,
    target: Option<u64>,
) -> Result<Vec<Candidate>> {
    let Some(target) = target else {
        return Ok(ordered);
    };

    if !ordered.iter().any(|c| c.num == target) {
        return Err(Error::TargetNotFound(target));
    }

    let selected: Vec<Candidate> = ordered
        .into_iter()
        .filter(|c| match direction {
            Direction::Up => c.num <= target,
            Direction::Down => c.num > target,
        })
        .collect();

    debug!(
        "target {target} selects {} migrations going {direction}",
        selected.len()
    );
    Ok(selected)
}
