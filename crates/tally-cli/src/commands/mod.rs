//! CLI subcommand implementations.

pub mod aggregate;
pub mod import;
pub mod ingest;
pub mod regenerate;
pub mod rules;
pub mod status;
pub mod summary;
pub mod util;
