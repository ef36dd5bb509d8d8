//! Directory scanning for migration files.
//!
//! A migration file is a regular file whose name starts with a run of ASCII digits
//! and ends with the configured extension, e.g. `0005-add-users.sql`. The
//! leading digits are its sequence number.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use stepwise_common::{Error, Result};
use tracing::{debug, warn};

/// A raw directory entry as seen by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub file_name: String,
    pub is_file: bool,
}

/// A well-formed migration file with its parsed sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub num: u64,
    pub file_name: String,
    pub path: PathBuf,
}

impl Candidate {
    /// Display title, the path relative to the working directory.
    pub fn title(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parse the leading run of digits in `file_name`.
pub fn parse_sequence_number(file_name: &str) -> Result<u64> {
    let end = file_name
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(file_name.len());
    let digits = &file_name[..end];
    if digits.is_empty() {
        return Err(Error::InvalidMigrationName(format!(
            "\"{file_name}\" has no leading sequence number"
        )));
    }
    digits.parse::<u64>().map_err(|e| {
        Error::InvalidMigrationName(format!("\"{file_name}\" sequence number: {e}"))
    })
}

/// Reads candidate migrations from a single directory.
pub struct MigrationSource {
    dir: PathBuf,
    pattern: Regex,
}

impl MigrationSource {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        let extension = extension.trim_start_matches('.');
        if extension.is_empty() {
            return Err(Error::Config("migration extension cannot be empty".into()));
        }
        let pattern = Regex::new(&format!(r"^[0-9]+[^/]*\.{}$", regex::escape(extension)))
            .map_err(|e| Error::Config(format!("invalid migration extension: {e}")))?;
        Ok(Self {
            dir: dir.into(),
            pattern,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern.is_match(file_name)
    }

    /// Every entry in the directory, sorted by name. A missing directory has no entries.
    pub fn entries(&self) -> Result<Vec<SourceEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("migrations directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to read {}: {e}", self.dir.display()),
                )));
            }
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            // Follows symlinks, so a link to a regular file counts as a file.
            let is_file = fs::metadata(entry.path())
                .map(|m| m.is_file())
                .unwrap_or(false);
            entries.push(SourceEntry { file_name, is_file });
        }
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    /// Well-formed migration files, in directory-name order.
    pub fn scan(&self) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for entry in self.entries()? {
            if !entry.is_file {
                continue;
            }
            if !self.matches(&entry.file_name) {
                warn!(
                    "\"{}\" ignored. Does not match migration naming schema",
                    entry.file_name
                );
                continue;
            }
            match parse_sequence_number(&entry.file_name) {
                Ok(num) => candidates.push(Candidate {
                    num,
                    path: self.dir.join(&entry.file_name),
                    file_name: entry.file_name,
                }),
                Err(e) => warn!("{e}, ignored"),
            }
        }
        debug!(
            "found {} migration files in {}",
            candidates.len(),
            self.dir.display()
        );
        Ok(candidates)
    }
}
