use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

use crate::config_override::CliConfigOverrides;

/// Command-line client for a RAG chat backend.
#[derive(Debug, Parser)]
#[command(name = "ragchat", version)]
pub struct Cli {
    #[clap(flatten)]
    pub config_overrides: CliConfigOverrides,

    /// Backend base URL. Takes precedence over `RAGCHAT_BASE_URL` and
    /// `config.toml`.
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Print listings as JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List chats.
    Chats,

    /// Show the messages of a chat.
    Messages {
        chat: String,
    },

    /// Delete a chat and its messages.
    DeleteChat {
        chat: String,
    },

    /// Send a message and stream the reply to stdout.
    Ask(AskArgs),

    /// Manage projects.
    #[command(subcommand)]
    Projects(ProjectsCommand),

    /// Show the file tree of a project.
    Files {
        project: String,
    },

    /// Upload files or folders into a project.
    Upload {
        project: String,

        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Delete a file from its project.
    DeleteFile {
        file: String,
    },

    /// Link, unlink and sync a project's Git repository.
    #[command(subcommand)]
    Git(GitCommand),
}

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// Continue an existing chat. Without it a new chat is created.
    #[arg(long)]
    pub chat: Option<String>,

    /// Project to retrieve context from. May be repeated.
    #[arg(long = "project", short = 'p', value_name = "PROJECT")]
    pub projects: Vec<String>,

    /// Message text. Read from stdin when omitted or `-`.
    pub prompt: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ProjectsCommand {
    /// List projects.
    List,

    /// Create a project.
    Create { name: String },

    /// Delete a project and everything in it.
    Delete { project: String },
}

#[derive(Debug, Subcommand)]
pub enum GitCommand {
    /// Show the linked repository and its sync status.
    Show { project: String },

    /// Link a repository to a project.
    Link {
        project: String,

        url: String,

        #[arg(long, default_value = "main")]
        branch: String,

        /// Access token for private repositories.
        #[arg(long, env = "RAGCHAT_GIT_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Remove the repository link.
    Unlink { project: String },

    /// Start a sync of the linked repository.
    Sync {
        project: String,

        /// Wait until the sync finishes.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
}
