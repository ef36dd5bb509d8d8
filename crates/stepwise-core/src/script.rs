//! Script migrations: a file with an `-- Up` section and an optional `-- Down` section.

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use stepwise_common::{Error, Result, ScriptTarget};
use tracing::debug;

use crate::migration::{Migration, MigrationLoader, Procedure};
use crate::source::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Up,
    Down,
}

/// The executable bodies of a script migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub up: String,
    pub down: String,
}

impl Script {
    /// Split `content` at its section markers. Text before any marker belongs
    /// to the up section; comment lines and blank lines are dropped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut section = Section::Up;
        let mut seen_up = false;
        let mut seen_down = false;

        for line in content.lines() {
            let trimmed = line.trim();
            if let Some(marker) = section_marker(trimmed) {
                match marker {
                    Section::Up if seen_up || seen_down => {
                        return Err(Error::Script("unexpected second `-- Up` marker".into()));
                    }
                    Section::Down if seen_down => {
                        return Err(Error::Script("unexpected second `-- Down` marker".into()));
                    }
                    Section::Up => seen_up = true,
                    Section::Down => seen_down = true,
                }
                section = marker;
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            match section {
                Section::Up => up.push(line),
                Section::Down => down.push(line),
            }
        }

        Ok(Self {
            up: up.join("\n").trim().to_string(),
            down: down.join("\n").trim().to_string(),
        })
    }

    pub fn body(&self, apply: bool) -> &str {
        if apply { &self.up } else { &self.down }
    }
}

fn section_marker(trimmed: &str) -> Option<Section> {
    let rest = trimmed.strip_prefix("--")?.trim();
    if rest.eq_ignore_ascii_case("up") {
        Some(Section::Up)
    } else if rest.eq_ignore_ascii_case("down") {
        Some(Section::Down)
    } else {
        None
    }
}

/// Runs a [`Script`] against any [`ScriptTarget`].
pub struct ScriptProcedure {
    script: Script,
}

impl ScriptProcedure {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

#[async_trait]
impl<T: ScriptTarget + ?Sized> Procedure<T> for ScriptProcedure {
    async fn apply(&self, target: &T) -> Result<()> {
        target.execute_script(self.script.body(true)).await
    }

    async fn revert(&self, target: &T) -> Result<()> {
        if self.script.down.is_empty() {
            debug!("no down section, nothing to revert");
        }
        target.execute_script(self.script.body(false)).await
    }
}

/// Loads script migrations from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptLoader;

impl<T: ScriptTarget + ?Sized> MigrationLoader<T> for ScriptLoader {
    fn load(&self, candidate: &Candidate) -> Result<Migration<T>> {
        let content = fs::read_to_string(&candidate.path).map_err(|e| {
            Error::Script(format!(
                "failed to read migration file {}: {e}",
                candidate.path.display()
            ))
        })?;
        let script = Script::parse(&content)
            .map_err(|e| Error::Script(format!("{}: {e}", candidate.title())))?;
        Ok(Migration::new(
            candidate.num,
            candidate.title(),
            Arc::new(ScriptProcedure::new(script)),
        ))
    }
}
