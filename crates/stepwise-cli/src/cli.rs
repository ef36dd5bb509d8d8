use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stepwise_config::{DEFAULT_CONFIG_FILE, DEFAULT_DB_PROPERTY};

#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(about = "Ordered, exactly-once data migrations")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Change to this directory before doing anything else
    #[arg(short = 'c', long, global = true)]
    pub chdir: Option<PathBuf>,

    /// Config file holding the database descriptor
    #[arg(short = 'f', long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Property of the config file that holds the database descriptor
    #[arg(long, global = true, default_value = DEFAULT_DB_PROPERTY)]
    pub db_property: String,

    /// Inline JSON database descriptor, used instead of the config file
    #[arg(long, global = true, env = "STEPWISE_DB_CONFIG")]
    pub db_config: Option<String>,

    /// Directory containing migration files
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Extension of migration files
    #[arg(long, global = true)]
    pub extension: Option<String>,

    /// Treat unapplied migrations beyond the target as pending instead of missed
    #[arg(long, global = true)]
    pub allow_pending: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply pending migrations, up to and including TARGET
    Up {
        /// Sequence number or file name of the last migration to apply
        target: Option<String>,
    },

    /// Revert applied migrations, stopping above TARGET
    Down {
        /// Sequence number or file name of the migration to keep
        target: Option<String>,
    },

    /// Create a new, empty migration file
    Create {
        /// Title words, joined with `-` in the file name
        title: Vec<String>,
    },
}

impl Cli {
    /// The subcommand to run; a bare invocation migrates up.
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Up { target: None })
    }
}
