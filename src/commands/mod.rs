//! Command handlers for the CLI
//!
//! - `ask`: one fan-out turn, answers printed as they arrive
//! - `chat`: interactive multi-backend session
//! - `models`: list the backend catalog
//! - `suggest`: recommend backends for a query
//! - `history`: saved conversations
//! - `auth`: credential management
//!
//! The shared helpers below wire a [`TurnCoordinator`] from configuration and
//! render turn output.

use crate::catalog::BackendCatalog;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::providers;
use crate::storage::SqliteStorage;
use crate::suggest::optimal_model_set;
use crate::turn::{CoordinatorSettings, GlobalError, Response, Turn, TurnCoordinator, TurnEvent};
use colored::Colorize;
use prettytable::{format, row, Table};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub mod ask;
pub mod auth;
pub mod chat;
pub mod history;
pub mod models;
pub mod special_commands;
pub mod suggest;

/// Build a coordinator with clients, search and (optionally) SQLite persistence
///
/// # Errors
///
/// Returns error if an HTTP client or the conversation database cannot be
/// initialized
pub fn build_coordinator(
    config: &Config,
    catalog: Arc<BackendCatalog>,
    credentials: Arc<dyn CredentialStore>,
    persist: bool,
) -> Result<TurnCoordinator> {
    let clients = providers::create_clients(config, credentials.clone())?;
    let mut coordinator = TurnCoordinator::new(
        catalog,
        clients,
        credentials.clone(),
        CoordinatorSettings::from_config(config),
    );

    if let Some(search) = providers::create_search_client(config, credentials)? {
        coordinator = coordinator.with_search(search);
    }
    if persist {
        let storage = SqliteStorage::open(config.storage.db_path.as_deref())?;
        tracing::debug!(path = %storage.path().display(), "Using conversation database");
        coordinator = coordinator.with_persistence(Arc::new(storage));
    }
    Ok(coordinator)
}

/// Backends to query when the user did not name any
///
/// Uses the suggested set for the prompt, restricted to configured backends,
/// and falls back to every cloud backend.
pub fn resolve_backends(catalog: &BackendCatalog, requested: &[String], prompt: &str) -> Vec<String> {
    if !requested.is_empty() {
        return requested.to_vec();
    }

    let suggested: Vec<String> = optimal_model_set(prompt)
        .into_iter()
        .filter(|id| catalog.contains(id))
        .collect();
    if !suggested.is_empty() {
        tracing::debug!(backends = ?suggested, "Using suggested backend set");
        return suggested;
    }

    catalog
        .descriptors()
        .iter()
        .filter(|d| !d.is_on_device)
        .map(|d| d.id.clone())
        .collect()
}

/// Drive outstanding jobs to completion, printing events as they arrive
pub async fn drive(
    coordinator: &mut TurnCoordinator,
    events: &mut UnboundedReceiver<TurnEvent>,
    catalog: &BackendCatalog,
) {
    print_events(events, catalog);
    while coordinator.step().await {
        print_events(events, catalog);
    }
    print_events(events, catalog);
}

/// Print every queued event
pub fn print_events(events: &mut UnboundedReceiver<TurnEvent>, catalog: &BackendCatalog) {
    while let Ok(event) = events.try_recv() {
        match event {
            TurnEvent::Resolved { response, .. } => print_response(catalog, &response),
            TurnEvent::BadgeRaised { backend_id } => {
                println!(
                    "{}",
                    format!("● {} finished", catalog.display_name(&backend_id)).magenta()
                );
            }
            TurnEvent::BannerRaised(banner) => print_banner(&banner),
            TurnEvent::StaleResult { backend_id, .. } => {
                tracing::debug!(backend.id = %backend_id, "Ignored result for earlier turn");
            }
            _ => {}
        }
    }
}

/// Print one backend answer with its header line
pub fn print_response(catalog: &BackendCatalog, response: &Response) {
    let name = catalog.display_name(&response.backend_id);
    let mut header = format!("── {} ({}) · {} ms", name, response.backend_id, response.latency_ms);
    if let Some(tokens) = response.token_count {
        header.push_str(&format!(" · {} tokens", tokens));
    }

    if response.is_error() {
        println!("\n{}", header.red().bold());
        println!("{}", response.text.red());
    } else {
        println!("\n{}", header.green().bold());
        println!("{}", response.text);
    }
}

/// Print the error banner
pub fn print_banner(banner: &GlobalError) {
    println!("\n{} {}", "⚠".yellow().bold(), banner.message.yellow());
    if let Some(action) = banner.action {
        println!(
            "  {} run {} (or /key in chat)",
            action.label().cyan(),
            "coro auth set <KEY>".cyan()
        );
    }
}

/// Print a summary table for a settled turn
pub fn print_summary(catalog: &BackendCatalog, turn: &Turn) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Backend".bold(),
        "Status".bold(),
        "Latency".bold(),
        "Tokens".bold()
    ]);

    for response in turn.responses_in_order() {
        let status = match response.error_kind {
            Some(kind) => kind.to_string().red(),
            None if response.is_placeholder() => "pending".yellow(),
            None => "ok".green(),
        };
        let tokens = response
            .token_count
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(row![
            catalog.display_name(&response.backend_id).cyan(),
            status,
            format!("{} ms", response.latency_ms),
            tokens
        ]);
    }

    println!();
    table.printstd();
    println!("Total latency: {} ms", turn.total_latency_ms);
}
