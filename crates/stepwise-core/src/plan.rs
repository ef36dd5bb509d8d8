//! Duplicate detection and direction-aware ordering.

use std::collections::{BTreeMap, BTreeSet};

use stepwise_common::{Direction, Error, Result};
use tracing::error;

use crate::source::Candidate;

/// Candidates that passed validation, plus every sequence number seen.
#[derive(Debug, Clone)]
pub struct Validated {
    pub candidates: Vec<Candidate>,
    pub all_numbers: BTreeSet<u64>,
}

/// Reject the whole set if any two files share a sequence number.
pub fn validate(candidates: Vec<Candidate>) -> Result<Validated> {
    let mut by_number: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    for candidate in &candidates {
        by_number
            .entry(candidate.num)
            .or_default()
            .push(candidate.file_name.clone());
    }

    let duplicated: Vec<(u64, Vec<String>)> = by_number
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .collect();

    if !duplicated.is_empty() {
        let count = duplicated.iter().map(|(_, files)| files.len()).sum();
        for (num, files) in &duplicated {
            error!("duplicate file number {num}: {}", files.join(", "));
        }
        return Err(Error::DuplicateSequenceNumber {
            count,
            numbers: duplicated.into_iter().map(|(num, _)| num).collect(),
        });
    }

    let all_numbers = candidates.iter().map(|c| c.num).collect();
    Ok(Validated {
        candidates,
        all_numbers,
    })
}

/// Whether `num` can run in `direction` given the highest recorded number.
pub fn is_runnable(num: u64, last_applied: Option<u64>, direction: Direction) -> bool {
    match direction {
        Direction::Up => last_applied.is_none_or(|last| num > last),
        Direction::Down => last_applied.is_some_and(|last| num <= last),
    }
}

/// Runnable candidates, ascending for `Up` and descending for `Down`.
pub fn order_runnable(
    candidates: &[Candidate],
    last_applied: Option<u64>,
    direction: Direction,
) -> Vec<Candidate> {
    let mut runnable: Vec<Candidate> = candidates
        .iter()
        .filter(|c| is_runnable(c.num, last_applied, direction))
        .cloned()
        .collect();

    // Stable, so equal numbers keep discovery order.
    match direction {
        Direction::Up => runnable.sort_by(|a, b| a.num.cmp(&b.num)),
        Direction::Down => runnable.sort_by(|a, b| b.num.cmp(&a.num)),
    }
    runnable
}
