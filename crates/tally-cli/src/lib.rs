//! Tally CLI library.
//!
//! Command definitions, configuration and subcommand implementations for the
//! `tally` binary.

mod cli;
pub mod commands;
mod config;

pub use cli::{AliasAction, Cli, Commands, MappingAction, SummaryArgs};
pub use config::Config;
