//! Coro - multi-backend prompt fan-out CLI
//!
#![doc = "Main entry point for the Coro application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coro::cli::{Cli, Commands};
use coro::commands;
use coro::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    let config_path = cli.config.as_deref().unwrap_or("config/coro.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    coro::metrics::init_metrics_exporter();

    match cli.command {
        Commands::Ask {
            prompt,
            models,
            json,
            ..
        } => {
            tracing::info!("Starting ask command");
            commands::ask::run_ask(config, prompt, models, json).await?;
            Ok(())
        }
        Commands::Chat { models, resume, .. } => {
            if let Some(r) = &resume {
                tracing::debug!("Resuming conversation: {}", r);
            }
            commands::chat::run_chat(config, models, resume).await?;
            Ok(())
        }
        Commands::Models { json } => {
            commands::models::list_models(&config, json)?;
            Ok(())
        }
        Commands::Suggest {
            query,
            selected,
            max,
        } => {
            commands::suggest::run_suggest(&config, &query, &selected, max)?;
            Ok(())
        }
        Commands::History { command } => {
            tracing::info!("Starting history command");
            commands::history::handle_history(&config, command)?;
            Ok(())
        }
        Commands::Auth { command } => {
            commands::auth::handle_auth(&config, command)?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over `--verbose`. Logs go to stderr so command output on
/// stdout stays parseable.
fn init_tracing(verbose: bool, json_logs: bool) {
    let default_level = if verbose { "coro=debug" } else { "coro=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
