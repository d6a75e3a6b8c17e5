//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tally_core::{Category, UserId};

use crate::commands::util::parse_user;

/// Coding activity summaries from editor heartbeats.
///
/// Stores heartbeats, aggregates them into daily summaries in the background
/// and answers time range queries by project, language, editor, operating
/// system and machine.
#[derive(Debug, Parser)]
#[command(name = "tally", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Store heartbeats read as JSON lines from stdin.
    Ingest {
        /// User for heartbeats that do not name one.
        #[arg(long, value_parser = parse_user)]
        user: Option<UserId>,
    },

    /// Import a user's history from a JSON lines file.
    Import {
        #[arg(long, value_parser = parse_user)]
        user: UserId,

        /// File with one heartbeat per line.
        #[arg(long)]
        file: PathBuf,

        /// Origin recorded on imported heartbeats; reimports resume from it.
        #[arg(long, default_value = "import")]
        origin: String,
    },

    /// Show the time summary of a user.
    Summary(SummaryArgs),

    /// Run one aggregation pass now.
    Aggregate,

    /// Aggregate periodically until interrupted.
    Serve,

    /// Rebuild all persisted summaries of a user.
    Regenerate {
        #[arg(long, value_parser = parse_user)]
        user: UserId,
    },

    /// Manage key aliases.
    #[command(subcommand)]
    Alias(AliasAction),

    /// Manage extension to language mappings.
    #[command(subcommand)]
    Mapping(MappingAction),

    /// Apply a user's language mappings to stored heartbeats without a language.
    BackfillLanguage {
        #[arg(long, value_parser = parse_user)]
        user: UserId,
    },

    /// Delete every heartbeat and summary of a user.
    DeleteUser {
        #[arg(long, value_parser = parse_user)]
        user: UserId,
    },

    /// Show aggregation progress per user.
    Status,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[arg(long, value_parser = parse_user)]
    pub user: UserId,

    /// Range start: RFC 3339, YYYY-MM-DD or relative ("7 days ago").
    #[arg(long, default_value = "7 days ago")]
    pub from: String,

    /// Range end, exclusive. Defaults to now.
    #[arg(long)]
    pub to: Option<String>,

    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    #[arg(long)]
    pub editor: Option<String>,

    #[arg(long)]
    pub os: Option<String>,

    #[arg(long)]
    pub machine: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum AliasAction {
    /// Map a key onto another key of the same category.
    Add {
        #[arg(long, value_parser = parse_user)]
        user: UserId,

        /// project, language, editor, os or machine.
        #[arg(long)]
        category: Category,

        /// Key as it appears in heartbeats.
        #[arg(long)]
        key: String,

        /// Key it is reported as.
        #[arg(long)]
        value: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum MappingAction {
    /// Map a file extension to a language.
    Add {
        #[arg(long, value_parser = parse_user)]
        user: UserId,

        /// Extension, with or without the leading dot.
        #[arg(long)]
        extension: String,

        #[arg(long)]
        language: String,

        /// Also apply the mapping to stored heartbeats.
        #[arg(long)]
        backfill: bool,
    },
}
