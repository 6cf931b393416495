//! Backend suggestions for a query

use crate::catalog::BackendCatalog;
use crate::config::Config;
use crate::error::Result;
use crate::suggest::{classify_query, suggest_models};
use colored::Colorize;
use prettytable::{format, row, Table};

/// Print the query type and recommended backends not yet selected
pub fn run_suggest(config: &Config, query: &str, selected: &[String], max: usize) -> Result<()> {
    let catalog = BackendCatalog::from_config(&config.backends)?;
    let suggestions = suggest_models(&catalog, query, selected, max);

    println!("{} {}", "Query type:".bold(), classify_query(query));
    if suggestions.is_empty() {
        println!("{}", "Your selection already covers the best fits.".green());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Backend".bold(),
        "Reason".bold(),
        "Confidence".bold()
    ]);
    for suggestion in suggestions {
        let configured = if catalog.contains(&suggestion.backend_id) {
            suggestion.display_name.cyan()
        } else {
            format!("{} (not configured)", suggestion.display_name).dimmed()
        };
        table.add_row(row![
            configured,
            suggestion.reason,
            format!("{:.0}%", suggestion.confidence * 100.0)
        ]);
    }
    table.printstd();
    Ok(())
}
