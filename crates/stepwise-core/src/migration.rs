use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use stepwise_common::{Direction, Error, Result};

use crate::source::Candidate;

/// Forward and backward steps of one migration against a target of type `T`.
#[async_trait]
pub trait Procedure<T: ?Sized>: Send + Sync {
    async fn apply(&self, target: &T) -> Result<()>;

    async fn revert(&self, target: &T) -> Result<()>;
}

/// A numbered, titled procedure ready to run.
pub struct Migration<T: ?Sized> {
    num: u64,
    title: String,
    procedure: Arc<dyn Procedure<T>>,
}

impl<T: ?Sized> Clone for Migration<T> {
    fn clone(&self) -> Self {
        Self {
            num: self.num,
            title: self.title.clone(),
            procedure: Arc::clone(&self.procedure),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Migration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("num", &self.num)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized + Sync> Migration<T> {
    pub fn new(num: u64, title: impl Into<String>, procedure: Arc<dyn Procedure<T>>) -> Self {
        Self {
            num,
            title: title.into(),
            procedure,
        }
    }

    pub fn num(&self) -> u64 {
        self.num
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Name stored with the execution record: the file stem of the title.
    pub fn name(&self) -> String {
        Path::new(&self.title)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.title.clone())
    }

    /// Run the procedure for `direction`. A panic inside it is reported as an error.
    pub async fn run(&self, direction: Direction, target: &T) -> Result<()> {
        let fut = match direction {
            Direction::Up => self.procedure.apply(target),
            Direction::Down => self.procedure.revert(target),
        };
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::Other(format!(
                "migration panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Turns a discovered file into a runnable migration.
pub trait MigrationLoader<T: ?Sized>: Send + Sync {
    fn load(&self, candidate: &Candidate) -> Result<Migration<T>>;
}

/// Adapts a closure into a [`MigrationLoader`].
pub struct FnLoader<F>(pub F);

impl<T, F> MigrationLoader<T> for FnLoader<F>
where
    T: ?Sized,
    F: Fn(&Candidate) -> Result<Migration<T>> + Send + Sync,
{
    fn load(&self, candidate: &Candidate) -> Result<Migration<T>> {
        (self.0)(candidate)
    }
}
