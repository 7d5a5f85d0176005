use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

mod cli;

use goodoo::config::load_settings;
use goodoo::handlers::StaticAuthBackend;
use goodoo::logging::init_logging;
use goodoo::server::{build_state, serve};
use goodoo::session::FilesystemSessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match args.command() {
        cli::Commands::Serve => run_server().await?,
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => {
                let settings = load_settings()?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            cli::ConfigCommands::Validate => {
                load_settings()?;
                println!("Configuration OK");
            }
        },
        cli::Commands::Version => {
            println!("goodoo v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn run_server() -> Result<()> {
    let settings = load_settings()?;
    let logging = init_logging(&settings).await;

    let logger = logging.logger("goodoo.main");
    logger.info("Starting goodoo application");

    let session_store = Arc::new(FilesystemSessionStore::new(&settings.session_dir, true)?);
    let auth = Arc::new(StaticAuthBackend::with_admin());

    let state = build_state(settings, logging, session_store, auth).await?;
    serve(state).await
}
