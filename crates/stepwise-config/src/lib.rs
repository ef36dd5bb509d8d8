pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, DEFAULT_CONFIG_FILE, DEFAULT_DB_PROPERTY, SETTINGS_PROPERTY};
pub use model::{DbConfig, MigrateSettings};
