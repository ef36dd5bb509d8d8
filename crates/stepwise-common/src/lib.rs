pub mod error;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use store::{ScriptTarget, StateStore, StoreError};
pub use types::{Direction, ExecutionRecord};
