//! Command line parsing.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "vigil", version, about = "Metrics alerting engine")]
pub struct Cli {
    /// Config profile; `PROFILE_`-prefixed env vars override the plain ones.
    #[arg(long, env = "VIGIL_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Override the HTTP bind address (`host:port`).
    #[arg(long, global = true)]
    pub bind: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the alerting engine and its HTTP API (default).
    Serve,
    /// Apply database migrations and exit.
    Migrate,
    /// Print the resolved configuration and exit.
    CheckConfig,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
