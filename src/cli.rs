//! Command-line interface definition for Coro
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for one-shot fan-out, interactive chat, conversation
//! history and credential management.

use clap::{Parser, Subcommand};

/// Coro - send one prompt to several AI backends and compare the answers
///
/// Fans a prompt out to every selected backend concurrently, shows each
/// answer as it arrives and keeps one conversation thread per backend.
#[derive(Parser, Debug, Clone)]
#[command(name = "coro")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/coro.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the conversation database path
    #[arg(long)]
    pub storage_path: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Coro
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Send one prompt to several backends and print every answer
    Ask {
        /// Prompt text
        prompt: String,

        /// Backends to query (comma separated); defaults to all configured
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        /// Ground the answers with web search results
        #[arg(short, long)]
        search: bool,

        /// Guidance text shared by every backend
        #[arg(short, long)]
        guidance: Option<String>,

        /// Sampling temperature override
        #[arg(long)]
        temperature: Option<f32>,

        /// Max tokens override
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Print the settled turn as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive multi-backend chat
    Chat {
        /// Backends to query (comma separated); defaults to all configured
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        /// Resume a saved conversation by id or id prefix
        #[arg(short, long)]
        resume: Option<String>,

        /// Ground every round with web search results
        #[arg(short, long)]
        search: bool,

        /// Guidance text shared by every backend
        #[arg(short, long)]
        guidance: Option<String>,
    },

    /// List configured backends in display order
    Models {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Suggest backends suited to a query
    Suggest {
        /// Query to classify
        query: String,

        /// Backends already selected (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        selected: Vec<String>,

        /// Maximum number of suggestions
        #[arg(long, default_value_t = 2)]
        max: usize,
    },

    /// Manage saved conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Manage provider credentials
    Auth {
        /// Auth subcommand
        #[command(subcommand)]
        command: AuthCommand,
    },
}

/// Conversation history subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List saved conversations, most recent first
    List,

    /// Show one saved conversation
    Show {
        /// Conversation id or 8-character prefix
        id: String,
    },

    /// Delete a saved conversation
    Delete {
        /// Conversation id or 8-character prefix
        id: String,
    },
}

/// Credential subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommand {
    /// Store a credential (prompts when --value is omitted)
    Set {
        /// Credential key (e.g. groq, google, deepseek, tavily)
        key: String,

        /// Credential value
        #[arg(long)]
        value: Option<String>,
    },

    /// Remove a stored credential
    Delete {
        /// Credential key
        key: String,
    },

    /// Show which credentials are configured
    Status,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/coro.yaml".to_string()),
            verbose: false,
            json_logs: false,
            storage_path: None,
            command: Commands::Models { json: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/coro.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::Models { json: false }));
    }

    #[test]
    fn test_cli_parse_ask_with_models() {
        let cli = Cli::try_parse_from([
            "coro",
            "ask",
            "What is Rust?",
            "--models",
            "gemini,llama-70b",
            "--search",
        ])
        .unwrap();

        if let Commands::Ask {
            prompt,
            models,
            search,
            json,
            ..
        } = cli.command
        {
            assert_eq!(prompt, "What is Rust?");
            assert_eq!(models, vec!["gemini", "llama-70b"]);
            assert!(search);
            assert!(!json);
        } else {
            panic!("Expected Ask command");
        }
    }

    #[test]
    fn test_cli_parse_chat_resume() {
        let cli = Cli::try_parse_from(["coro", "chat", "--resume", "abcd1234"]).unwrap();
        if let Commands::Chat { resume, models, .. } = cli.command {
            assert_eq!(resume.as_deref(), Some("abcd1234"));
            assert!(models.is_empty());
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_cli_parse_history_show() {
        let cli = Cli::try_parse_from(["coro", "history", "show", "abcd1234"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History {
                command: HistoryCommand::Show { ref id }
            } if id == "abcd1234"
        ));
    }

    #[test]
    fn test_cli_parse_auth_set() {
        let cli =
            Cli::try_parse_from(["coro", "auth", "set", "groq", "--value", "gsk_test"]).unwrap();
        if let Commands::Auth {
            command: AuthCommand::Set { key, value },
        } = cli.command
        {
            assert_eq!(key, "groq");
            assert_eq!(value.as_deref(), Some("gsk_test"));
        } else {
            panic!("Expected Auth Set command");
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "coro",
            "--verbose",
            "--json-logs",
            "--storage-path",
            "/tmp/coro.db",
            "models",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.storage_path.as_deref(), Some("/tmp/coro.db"));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["coro"]).is_err());
    }
}
