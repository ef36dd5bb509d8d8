use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid migration name: {0}")]
    InvalidMigrationName(String),

    #[error(
        "duplicate file numbers: {count} migration files share a sequence number ({})",
        join_numbers(.numbers)
    )]
    DuplicateSequenceNumber { count: usize, numbers: Vec<u64> },

    #[error("migration `{0}` not found")]
    TargetNotFound(u64),

    #[error("missed migrations numbers : {}", join_numbers(.0))]
    MissedMigrations(Vec<u64>),

    #[error("migration locked: {title} (number {num}) is already recorded by another run")]
    MigrationLocked { num: u64, title: String },

    #[error(
        "error inside migration {title}: {reason}{}",
        compensation_suffix(.compensation_error)
    )]
    MigrationProcedure {
        title: String,
        reason: String,
        compensation_error: Option<String>,
    },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("lock index creation failed: {0}")]
    IndexCreation(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when a failed migration could not be compensated and the target
    /// may be left half-migrated.
    pub fn is_corrupted_state(&self) -> bool {
        matches!(
            self,
            Error::MigrationProcedure {
                compensation_error: Some(_),
                ..
            }
        )
    }

    /// True for conditions detected before any migration touched the target.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::DuplicateSequenceNumber { .. }
                | Error::TargetNotFound(_)
                | Error::MissedMigrations(_)
                | Error::Script(_)
        )
    }
}

fn join_numbers(numbers: &[u64]) -> String {
    numbers
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn compensation_suffix(compensation_error: &Option<String>) -> String {
    match compensation_error {
        Some(e) => format!(
            "; reverting it also failed ({e}), the database may be in a corrupted state"
        ),
        None => String::new(),
    }
}
