pub mod consistency;
pub mod create;
pub mod engine;
pub mod lock;
pub mod migration;
pub mod migrator;
pub mod plan;
pub mod script;
pub mod source;
pub mod target;

pub use consistency::{MissedPolicy, check_consistency};
pub use create::create_migration;
pub use engine::{Engine, EventHook, MigrationEvent, RunReport, RunSet, RunState};
pub use lock::LockCoordinator;
pub use migration::{FnLoader, Migration, MigrationLoader, Procedure};
pub use migrator::{MigrateOptions, Migrator, Plan};
pub use plan::{Validated, order_runnable, validate};
pub use script::{Script, ScriptLoader, ScriptProcedure};
pub use source::{Candidate, MigrationSource, SourceEntry, parse_sequence_number};
pub use target::resolve_target;
