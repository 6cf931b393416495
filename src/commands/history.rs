use crate::catalog::{sort_ids, BackendCatalog};
use crate::cli::HistoryCommand;
use crate::config::Config;
use crate::error::{CoroError, Result};
use crate::storage::{PersistenceGateway, SavedConversation, SqliteStorage};
use crate::thread::Role;
use colored::Colorize;
use prettytable::{format, Table};

/// Handle history commands
pub fn handle_history(config: &Config, command: HistoryCommand) -> Result<()> {
    let storage = SqliteStorage::open(config.storage.db_path.as_deref())?;

    match command {
        HistoryCommand::List => {
            let sessions = storage.list()?;

            if sessions.is_empty() {
                println!("{}", "No conversation history found.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

            table.add_row(prettytable::row![
                "ID".bold(),
                "Prompt".bold(),
                "Backends".bold(),
                "Messages".bold(),
                "Last Updated".bold()
            ]);

            for session in sessions {
                let id_short: String = session.id.chars().take(8).collect();
                let prompt = truncate(&session.prompt, 40);
                let updated = session.updated_at.format("%Y-%m-%d %H:%M").to_string();

                table.add_row(prettytable::row![
                    id_short.cyan(),
                    prompt,
                    session.backend_count,
                    session.message_count,
                    updated
                ]);
            }

            println!("\nConversation History:");
            table.printstd();
            println!();
            println!(
                "Use {} to resume a conversation.",
                "coro chat --resume <ID>".cyan()
            );
            println!();
        }
        HistoryCommand::Show { id } => {
            let conversation = storage
                .load(&id)?
                .ok_or_else(|| CoroError::Storage(format!("Conversation not found: {}", id)))?;
            let catalog = BackendCatalog::from_config(&config.backends)?;
            print_conversation(&catalog, &conversation);
        }
        HistoryCommand::Delete { id } => {
            storage.delete(&id)?;
            println!("{}", format!("Deleted conversation {}", id).green());
        }
    }

    Ok(())
}

fn print_conversation(catalog: &BackendCatalog, conversation: &SavedConversation) {
    println!("\n{} {}", "Conversation".bold(), conversation.id.cyan());
    println!("{} {}", "Prompt:".bold(), conversation.prompt);
    println!(
        "{} {} · total {} ms",
        "Saved:".bold(),
        conversation.timestamp.format("%Y-%m-%d %H:%M"),
        conversation.total_latency_ms
    );

    let threads = conversation.threads();
    let mut ids: Vec<String> = threads.iter().map(|(id, _)| id.clone()).collect();
    sort_ids(&mut ids);

    for id in ids {
        let Some((_, messages)) = threads.iter().find(|(backend_id, _)| *backend_id == id) else {
            continue;
        };
        println!(
            "\n{}",
            format!("── {} ({}) ──", catalog.display_name(&id), id).cyan().bold()
        );
        for message in messages {
            match message.role {
                Role::User => println!("{} {}", "you:".bold(), message.content),
                Role::Assistant => println!("{}\n", message.content),
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
