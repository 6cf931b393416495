//! Interactive multi-backend chat
//!
//! The first message starts a turn on the selected backends; later plain
//! messages are broadcast as follow-ups. Special commands (see
//! [`super::special_commands`]) target single backends.

use super::special_commands::{parse_special_command, print_help, SpecialCommand};
use super::{build_coordinator, drive, print_events, print_summary, resolve_backends};
use crate::catalog::BackendCatalog;
use crate::config::Config;
use crate::credentials::{CredentialStore, KeyringCredentialStore};
use crate::error::Result;
use crate::thread::Role;
use crate::turn::{TurnCoordinator, TurnEvent, TurnState};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

struct ChatSession {
    coordinator: TurnCoordinator,
    events: UnboundedReceiver<TurnEvent>,
    catalog: Arc<BackendCatalog>,
    credentials: Arc<dyn CredentialStore>,
    requested: Vec<String>,
}

/// Start interactive chat mode
///
/// # Arguments
///
/// * `config` - Global configuration (consumed)
/// * `models` - Backends to query; empty picks a suggested set per first prompt
/// * `resume` - Saved conversation to continue
pub async fn run_chat(config: Config, models: Vec<String>, resume: Option<String>) -> Result<()> {
    tracing::info!("Starting interactive chat mode");

    let catalog = Arc::new(BackendCatalog::from_config(&config.backends)?);
    let credentials: Arc<dyn CredentialStore> = Arc::new(KeyringCredentialStore::new());
    let mut coordinator = build_coordinator(&config, catalog.clone(), credentials.clone(), true)?;
    let events = coordinator.subscribe();

    let mut session = ChatSession {
        coordinator,
        events,
        catalog,
        credentials,
        requested: models,
    };

    let mut rl = DefaultEditor::new()?;
    print_welcome_banner(&session);

    if let Some(id) = resume {
        match session.coordinator.load_conversation(&id).await {
            Ok(retried) => {
                println!("{}", format!("Resumed conversation {}", id).green());
                if retried > 0 {
                    println!("Retried {} backend(s) after loading", retried);
                }
                print_events(&mut session.events, &session.catalog);
                session.print_status();
            }
            Err(e) => println!("{}", format!("Could not resume {}: {}", id, e).red()),
        }
    }

    loop {
        match rl.readline(&"coro> ".cyan().to_string()) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;

                let command = match parse_special_command(trimmed) {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{}", e.to_string().red());
                        continue;
                    }
                };
                if command == SpecialCommand::Exit {
                    break;
                }
                if let Err(e) = session.handle(command, trimmed, &mut rl).await {
                    println!("{}", e.to_string().red());
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::error!("Readline error: {}", e);
                break;
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

impl ChatSession {
    async fn handle(
        &mut self,
        command: SpecialCommand,
        input: &str,
        rl: &mut DefaultEditor,
    ) -> Result<()> {
        match command {
            SpecialCommand::None => self.send(input).await?,
            SpecialCommand::Ask {
                backend_id,
                message,
            } => {
                self.coordinator.begin_follow_up(&backend_id, &message).await?;
                self.drive().await;
            }
            SpecialCommand::Retry(backend_id) => {
                self.coordinator.begin_retry(&backend_id)?;
                self.drive().await;
            }
            SpecialCommand::Tab(backend_id) => {
                self.coordinator.select_tab(&backend_id)?;
                self.print_transcript(&backend_id);
            }
            SpecialCommand::Key(key) => {
                let value = rl.readline(&format!("Value for {}: ", key))?;
                let value = value.trim();
                if value.is_empty() {
                    println!("{}", "No value entered, nothing stored.".yellow());
                    return Ok(());
                }
                self.credentials.set(&key, value)?;
                println!("{}", format!("Stored credential {}", key).green());
                let retried = self.coordinator.credentials_changed().await;
                print_events(&mut self.events, &self.catalog);
                if retried > 0 {
                    println!("Retried {} backend(s)", retried);
                }
            }
            SpecialCommand::New => {
                self.coordinator.start_new_chat();
                print_events(&mut self.events, &self.catalog);
                println!("{}", "Started a new chat".green());
            }
            SpecialCommand::ShowStatus => self.print_status(),
            SpecialCommand::Help => print_help(),
            SpecialCommand::Exit => {}
        }
        Ok(())
    }

    /// Submit a new turn, or broadcast when a turn is active
    async fn send(&mut self, text: &str) -> Result<()> {
        let active = matches!(
            self.coordinator.turn().map(|t| &t.state),
            Some(TurnState::Success) | Some(TurnState::Loading)
        );

        if active {
            self.coordinator.begin_broadcast_follow_up(text, None).await?;
        } else {
            let backends = resolve_backends(&self.catalog, &self.requested, text);
            self.coordinator.begin_submit(text, &backends, None).await?;
        }
        self.drive().await;

        if let Some(turn) = self.coordinator.turn() {
            print_summary(&self.catalog, turn);
        }
        Ok(())
    }

    async fn drive(&mut self) {
        drive(&mut self.coordinator, &mut self.events, &self.catalog).await;
    }

    fn print_transcript(&self, backend_id: &str) {
        println!(
            "\n{}",
            format!("── {} ──", self.catalog.display_name(backend_id)).cyan().bold()
        );
        for message in self.coordinator.thread(backend_id) {
            match message.role {
                Role::User => println!("{} {}", "you:".bold(), message.content),
                Role::Assistant if message.is_pending => println!("{}", "…".dimmed()),
                Role::Assistant => println!("{}\n", message.content),
            }
        }
    }

    fn print_status(&self) {
        let Some(turn) = self.coordinator.turn() else {
            println!("No active turn. Type a message to start one.");
            return;
        };

        println!("\n{} {}", "Prompt:".bold(), turn.displayed_prompt);
        let state = match &turn.state {
            TurnState::Error(reason) => format!("error ({})", reason),
            other => format!("{:?}", other).to_lowercase(),
        };
        println!("{} {}", "State:".bold(), state);
        if let Some(tab) = self.coordinator.selected_tab() {
            println!("{} {}", "Tab:".bold(), self.catalog.display_name(tab));
        }
        let badges = self.coordinator.badges();
        if !badges.is_empty() {
            println!("{} {}", "Finished off-screen:".bold(), badges.join(", "));
        }
        if let Some(record) = self.coordinator.active_record() {
            println!("{} {}", "Saved as:".bold(), record.short());
        }
        print_summary(&self.catalog, turn);
        if let Some(banner) = self.coordinator.global_error() {
            super::print_banner(banner);
        }
    }
}

fn print_welcome_banner(session: &ChatSession) {
    println!("{}", "Coro interactive chat".bold());
    if session.requested.is_empty() {
        println!("Backends: chosen per prompt");
    } else {
        let names: Vec<&str> = session
            .requested
            .iter()
            .map(|id| session.catalog.display_name(id))
            .collect();
        println!("Backends: {}", names.join(", "));
    }
    println!("Type '/help' for commands, '/exit' to leave.\n");
}
