//! Scaffolding for new migration files.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use stepwise_common::{Error, Result};
use tracing::info;

use crate::source::parse_sequence_number;

/// Gap left between generated sequence numbers.
pub const NUMBER_INCREMENT: u64 = 5;
/// Minimum zero-padded width of generated sequence numbers.
pub const NUMBER_WIDTH: usize = 4;

const TEMPLATE: &str = "-- Up\n\n\n-- Down\n\n";

/// Join title words with a space, then turn every whitespace run into `-`.
/// Leading or trailing whitespace becomes a leading or trailing `-`.
pub fn slugify(words: &[String]) -> String {
    let mut slug = String::new();
    let mut in_space = false;
    for c in words.join(" ").chars() {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
        } else {
            slug.push(c);
            in_space = false;
        }
    }
    slug
}

/// The number a new migration in `dir` should get: the highest existing
/// number plus [`NUMBER_INCREMENT`], or [`NUMBER_INCREMENT`] for an empty directory.
pub fn next_number(dir: &Path) -> Result<u64> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(NUMBER_INCREMENT),
        Err(e) => return Err(e.into()),
    };

    let mut highest = 0;
    for entry in read_dir {
        let name = entry?.file_name().to_string_lossy().into_owned();
        // Entries without leading digits are not migrations.
        if let Ok(num) = parse_sequence_number(&name) {
            highest = highest.max(num);
        }
    }
    highest
        .checked_add(NUMBER_INCREMENT)
        .ok_or_else(|| Error::InvalidMigrationName("sequence numbers exhausted".into()))
}

/// Write an empty migration named after `title` into `dir` and return its path.
///
/// The directory is created if needed. An existing file is never overwritten.
pub fn create_migration(dir: &Path, title: &[String], extension: &str) -> Result<PathBuf> {
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() {
        return Err(Error::Config("migration extension cannot be empty".into()));
    }

    fs::create_dir_all(dir)?;
    let num = next_number(dir)?;
    let slug = slugify(title);
    let file_name = if slug.is_empty() {
        format!("{num:0NUMBER_WIDTH$}.{extension}")
    } else {
        format!("{num:0NUMBER_WIDTH$}-{slug}.{extension}")
    };
    let path = dir.join(file_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                Error::Other(format!("{} already exists", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
    file.write_all(TEMPLATE.as_bytes())?;

    info!("created migration {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use crate::source::MigrationSource;
    use tempfile::TempDir;

    fn words(s: &[&str]) -> Vec<String> {
        s.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn slugify_joins_and_collapses_whitespace() {
        assert_eq!(slugify(&words(&["add", "users"])), "add-users");
        assert_eq!(slugify(&words(&["add \t users  ", "table"])), "add-users-table");
        assert_eq!(slugify(&words(&[" add", "users "])), "-add-users-");
        assert_eq!(slugify(&[]), "");
    }

    #[test]
    fn first_migration_gets_increment() {
        let dir = TempDir::new().unwrap();
        let path = create_migration(dir.path(), &words(&["init"]), "sql").unwrap();
        assert_eq!(path.file_name().unwrap(), "0005-init.sql");
    }

    #[test]
    fn next_number_follows_highest_existing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0005-a.sql"), "").unwrap();
        fs::write(dir.path().join("0012-b.sql"), "").unwrap();
        fs::write(dir.path().join("README.md"), "").unwrap();

        assert_eq!(next_number(dir.path()).unwrap(), 17);
        let path = create_migration(dir.path(), &[], "sql").unwrap();
        assert_eq!(path.file_name().unwrap(), "0017.sql");
    }

    #[test]
    fn wide_numbers_are_not_truncated() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("99999-big.sql"), "").unwrap();
        let path = create_migration(dir.path(), &words(&["next"]), ".sql").unwrap();
        assert_eq!(path.file_name().unwrap(), "100004-next.sql");
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("db").join("migrations");
        let path = create_migration(&nested, &words(&["x"]), "sql").unwrap();
        assert!(path.starts_with(&nested));
        assert!(path.is_file());
    }

    #[test]
    fn created_file_is_discoverable_and_parses() {
        let dir = TempDir::new().unwrap();
        let path = create_migration(dir.path(), &words(&["add users"]), "sql").unwrap();

        let candidates = MigrationSource::new(dir.path(), "sql").unwrap().scan().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].num, 5);

        let script = Script::parse(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(script, Script::default());
    }

    #[test]
    fn empty_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            create_migration(dir.path(), &[], ""),
            Err(Error::Config(_))
        ));
    }
}
