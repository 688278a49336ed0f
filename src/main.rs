//! docker-gen entry point.

use std::process;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use log::{error, info};

mod cli;
mod config;
mod materialize;
mod orchestrator;
mod resolve;
mod runtime;
mod snapshot;
mod template;
mod types;
mod watcher;

use cli::Cli;
use config::{ConfigError, Settings};
use orchestrator::Orchestrator;
use runtime::DockerRuntime;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Load configuration
    let settings = match Settings::from_cli(&cli) {
        Ok(settings) => settings,
        Err(ConfigError::MissingTemplate) => {
            let _ = Cli::command().print_help();
            process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    info!(
        "Starting docker-gen with {} template(s)",
        settings.templates.iter().count()
    );

    if let Err(e) = run(settings).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let runtime = Arc::new(DockerRuntime::connect(settings.endpoint.as_deref())?);
    Orchestrator::new(runtime, settings.templates).run().await
}
