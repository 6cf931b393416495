//! Special commands parser for interactive chat
//!
//! Special commands steer the session instead of being sent to the backends:
//! - Follow up with a single backend
//! - Retry a failed backend
//! - Switch the shown tab
//! - Store a credential
//! - Start over, show status, show help, exit
//!
//! Commands are prefixed with `/`; the command word is case-insensitive.

use colored::Colorize;
use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Send a follow-up to one backend only
    Ask { backend_id: String, message: String },

    /// Re-send the latest exchange of one backend
    Retry(String),

    /// Show a backend's tab and transcript
    Tab(String),

    /// Store a credential and retry auth failures
    Key(String),

    /// Start a new chat
    New,

    /// Display turn status
    ShowStatus,

    /// Display help information
    Help,

    /// Exit the session
    Exit,

    /// Not a special command; a prompt for the backends
    None,
}

/// Parse user input into a special command
///
/// # Examples
///
/// ```
/// use coro::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(
///     parse_special_command("/retry gemini").unwrap(),
///     SpecialCommand::Retry("gemini".to_string())
/// );
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    let (word, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word.to_lowercase(), rest.trim()),
        None => (lower.clone(), ""),
    };

    match word.as_str() {
        "exit" | "quit" | "/exit" | "/quit" => Ok(SpecialCommand::Exit),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/status" => Ok(SpecialCommand::ShowStatus),
        "/new" => Ok(SpecialCommand::New),
        "/ask" => {
            let (backend_id, message) = rest
                .split_once(char::is_whitespace)
                .map(|(id, msg)| (id.trim(), msg.trim()))
                .filter(|(id, msg)| !id.is_empty() && !msg.is_empty())
                .ok_or_else(|| CommandError::MissingArgument {
                    command: "/ask".to_string(),
                    usage: "/ask <backend> <message>".to_string(),
                })?;
            Ok(SpecialCommand::Ask {
                backend_id: backend_id.to_lowercase(),
                message: message.to_string(),
            })
        }
        "/retry" => single_argument("/retry", "/retry <backend>", rest).map(SpecialCommand::Retry),
        "/tab" => single_argument("/tab", "/tab <backend>", rest).map(SpecialCommand::Tab),
        "/key" => single_argument("/key", "/key <credential>", rest).map(SpecialCommand::Key),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

fn single_argument(command: &str, usage: &str, rest: &str) -> Result<String, CommandError> {
    if rest.is_empty() {
        return Err(CommandError::MissingArgument {
            command: command.to_string(),
            usage: usage.to_string(),
        });
    }
    Ok(rest.to_lowercase())
}

/// Print help for the interactive chat
pub fn print_help() {
    println!("\n{}", "Chat commands".bold());
    println!("  <text>                   Send to every backend (first message starts the turn)");
    println!("  /ask <backend> <text>    Follow up with one backend");
    println!("  /retry <backend>         Retry a backend's latest exchange");
    println!("  /tab <backend>           Show a backend's transcript");
    println!("  /key <credential>        Store an API key and retry auth failures");
    println!("  /new                     Start a new chat");
    println!("  /status                  Show the current turn");
    println!("  /help                    Show this help");
    println!("  /exit                    Leave the chat\n");
}
