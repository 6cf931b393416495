//! Credential management commands

use crate::cli::AuthCommand;
use crate::config::Config;
use crate::credentials::{env_var_name, CredentialStore, KeyringCredentialStore};
use crate::error::{CoroError, Result};
use crate::providers::search::SEARCH_CREDENTIAL;
use colored::Colorize;
use prettytable::{format, row, Table};
use rustyline::DefaultEditor;

/// Handle `coro auth` subcommands against the system keyring
pub fn handle_auth(config: &Config, command: AuthCommand) -> Result<()> {
    let store = KeyringCredentialStore::new();
    run_auth(config, &store, command)
}

/// Handle `coro auth` subcommands against any credential store
pub fn run_auth(config: &Config, store: &dyn CredentialStore, command: AuthCommand) -> Result<()> {
    match command {
        AuthCommand::Set { key, value } => {
            let key = key.trim().to_lowercase();
            let value = match value {
                Some(value) => value,
                None => prompt_for_value(&key)?,
            };
            if value.trim().is_empty() {
                return Err(CoroError::Credential("Credential value cannot be empty".to_string()).into());
            }
            store.set(&key, value.trim())?;
            println!("{}", format!("Stored credential {}", key).green());
            if !credential_keys(config).contains(&key) {
                println!(
                    "{}",
                    format!("Note: no configured backend uses the {} credential", key).yellow()
                );
            }
        }
        AuthCommand::Delete { key } => {
            let key = key.trim().to_lowercase();
            store.delete(&key)?;
            println!("{}", format!("Removed credential {}", key).green());
        }
        AuthCommand::Status => print_status(config, store),
    }
    Ok(())
}

/// Credential keys referenced by the configuration, plus the search key
pub fn credential_keys(config: &Config) -> Vec<String> {
    let mut keys: Vec<String> = config
        .backends
        .iter()
        .filter_map(|b| b.credential.clone())
        .collect();
    keys.push(SEARCH_CREDENTIAL.to_string());
    keys.sort();
    keys.dedup();
    keys
}

fn prompt_for_value(key: &str) -> Result<String> {
    let mut rl = DefaultEditor::new()?;
    Ok(rl.readline(&format!("Value for {}: ", key))?)
}

fn print_status(config: &Config, store: &dyn CredentialStore) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Credential".bold(),
        "Status".bold(),
        "Env fallback".bold(),
        "Used by".bold()
    ]);

    for key in credential_keys(config) {
        let status = match store.get(&key) {
            Ok(Some(_)) => "configured".green(),
            Ok(None) => "missing".yellow(),
            Err(e) => {
                tracing::debug!(credential.key = %key, "Credential lookup failed: {}", e);
                "unavailable".red()
            }
        };
        let used_by: Vec<&str> = if key == SEARCH_CREDENTIAL {
            vec!["web search"]
        } else {
            config
                .backends
                .iter()
                .filter(|b| b.credential.as_deref() == Some(key.as_str()))
                .map(|b| b.id.as_str())
                .collect()
        };
        table.add_row(row![key.cyan(), status, env_var_name(&key), used_by.join(", ")]);
    }

    println!();
    table.printstd();
    println!();
}
