//! Backend listing for Coro
//!
//! Prints the configured backend catalog in display order, either as a table
//! or as JSON for scripting.

use crate::catalog::{BackendCatalog, BackendDescriptor};
use crate::config::Config;
use crate::error::{CoroError, Result};
use colored::Colorize;
use prettytable::{format, row, Table};

/// List configured backends
///
/// # Arguments
///
/// * `config` - Configuration holding the backend list
/// * `json` - Print as pretty JSON instead of a table
///
/// # Examples
///
/// ```no_run
/// use coro::config::Config;
/// use coro::commands::models::list_models;
///
/// list_models(&Config::default(), false).unwrap();
/// ```
pub fn list_models(config: &Config, json: bool) -> Result<()> {
    let catalog = BackendCatalog::from_config(&config.backends)?;
    tracing::debug!(count = catalog.len(), "Listing backends");

    if json {
        output_models_json(catalog.descriptors())
    } else {
        output_models_table(catalog.descriptors());
        Ok(())
    }
}

/// Output backends in JSON format
///
/// # Errors
///
/// Returns `CoroError::Serialization` if serialization fails
fn output_models_json(backends: &[BackendDescriptor]) -> Result<()> {
    let json = serde_json::to_string_pretty(backends).map_err(CoroError::Serialization)?;
    println!("{}", json);
    Ok(())
}

fn output_models_table(backends: &[BackendDescriptor]) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "ID".bold(),
        "Name".bold(),
        "Provider".bold(),
        "Tier".bold(),
        "Runs".bold()
    ]);

    for backend in backends {
        let runs = if backend.is_on_device {
            "on-device"
        } else {
            "cloud"
        };
        table.add_row(row![
            backend.id.cyan(),
            backend.display_name,
            backend.provider,
            backend.cost_tier,
            runs
        ]);
    }

    println!("\nConfigured backends:\n");
    table.printstd();
    println!();
}
