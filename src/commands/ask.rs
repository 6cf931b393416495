//! One-shot fan-out

use super::{build_coordinator, drive, print_summary, resolve_backends};
use crate::catalog::BackendCatalog;
use crate::config::Config;
use crate::credentials::{CredentialStore, KeyringCredentialStore};
use crate::error::{CoroError, Result};
use colored::Colorize;
use std::sync::Arc;

/// Send one prompt to several backends and print every answer
///
/// Answers are printed as they arrive, followed by a summary table. With
/// `json`, only the settled turn is printed, as JSON.
///
/// # Examples
///
/// ```no_run
/// use coro::commands::ask::run_ask;
/// use coro::config::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// run_ask(Config::default(), "Hello".to_string(), vec![], false).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_ask(config: Config, prompt: String, models: Vec<String>, json: bool) -> Result<()> {
    let catalog = Arc::new(BackendCatalog::from_config(&config.backends)?);
    let credentials: Arc<dyn CredentialStore> = Arc::new(KeyringCredentialStore::new());
    let mut coordinator = build_coordinator(&config, catalog.clone(), credentials, true)?;
    let mut events = coordinator.subscribe();

    let backends = resolve_backends(&catalog, &models, &prompt);
    tracing::info!(backends = ?backends, "Starting ask");

    if !json {
        let names: Vec<&str> = backends.iter().map(|id| catalog.display_name(id)).collect();
        println!("{} {}", "Asking".cyan().bold(), names.join(", "));
    }

    coordinator.begin_submit(&prompt, &backends, None).await?;
    if json {
        coordinator.settle().await;
    } else {
        drive(&mut coordinator, &mut events, &catalog).await;
    }

    let turn = coordinator
        .turn()
        .ok_or_else(|| CoroError::NoActiveTurn("turn was not created".to_string()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(turn)?);
        return Ok(());
    }

    print_summary(&catalog, turn);
    if let Some(record) = coordinator.active_record() {
        println!("Saved as {}", record.short().cyan());
    }
    Ok(())
}
