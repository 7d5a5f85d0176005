use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "goodoo", about = "Application server skeleton with typed model/method dispatch")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve,
    /// Inspect or validate the environment configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the resolved settings as JSON
    Show,
    /// Check that the environment produces a usable configuration
    Validate,
}

impl Cli {
    /// Default to `serve` when no subcommand is given.
    pub fn command(self) -> Commands {
        self.command.unwrap_or(Commands::Serve)
    }
}
