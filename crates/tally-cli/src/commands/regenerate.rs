//! Rebuilding and deleting a user's data.

use anyhow::{Context, Result};
use tally_core::UserId;
use tally_db::Database;
use tally_engine::Engine;

pub async fn run(engine: &Engine<Database>, user: &UserId) -> Result<usize> {
    let days = engine
        .regenerate_summaries(user)
        .await
        .with_context(|| format!("failed to regenerate summaries of {user}"))?;
    eprintln!("Regenerated {days} daily summaries for {user}");
    Ok(days)
}

pub async fn delete_user(engine: &Engine<Database>, user: &UserId) -> Result<usize> {
    let deleted = engine
        .delete_user_data(user)
        .await
        .with_context(|| format!("failed to delete data of {user}"))?;
    eprintln!("Deleted {deleted} heartbeats and all summaries of {user}");
    Ok(deleted)
}
