//! Alias and language mapping management.

use anyhow::{Context, Result};
use tally_core::{Alias, Category, LanguageMapping, RuleStore, UserId};
use tally_db::Database;
use tally_engine::Engine;

pub async fn add_alias(
    engine: &Engine<Database>,
    user: UserId,
    category: Category,
    key: &str,
    value: &str,
) -> Result<()> {
    let alias = Alias::new(user, category, key, value)?;
    engine.add_alias(alias).await.context("failed to add alias")?;
    eprintln!("{category} '{key}' is now reported as '{value}'");
    eprintln!("Persisted summaries keep the old key until 'tally regenerate' is run");
    Ok(())
}

pub async fn add_mapping(
    engine: &Engine<Database>,
    user: UserId,
    extension: &str,
    language: &str,
    backfill: bool,
) -> Result<()> {
    let mapping = LanguageMapping::new(user, extension, language)?;
    engine
        .add_language_mapping(mapping.clone())
        .await
        .context("failed to add language mapping")?;
    eprintln!("Files ending in .{} are now {}", mapping.extension, mapping.language);

    if backfill {
        let updated = engine.backfill_language(mapping).await?;
        eprintln!("Back-filled {updated} stored heartbeats");
    }
    Ok(())
}

/// Applies every mapping of a user to stored heartbeats.
pub async fn backfill(engine: &Engine<Database>, user: &UserId) -> Result<usize> {
    let mappings = engine.store().language_mappings_by_user(user)?;
    if mappings.is_empty() {
        eprintln!("No language mappings for {user}");
        return Ok(0);
    }

    let mut updated = 0;
    for mapping in mappings {
        updated += engine
            .backfill_language(mapping)
            .await
            .context("language back-fill failed")?;
    }
    eprintln!("Back-filled {updated} stored heartbeats");
    Ok(updated)
}
