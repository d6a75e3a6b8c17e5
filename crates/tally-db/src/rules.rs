use rusqlite::params;
use tally_core::{Alias, Category, LanguageMapping, RuleStore, UserId};

use crate::{Database, DbError};

impl RuleStore for Database {
    fn aliases_by_user(&self, user_id: &UserId) -> Result<Vec<Alias>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT category, key, value FROM aliases
             WHERE user_id = ? ORDER BY category ASC, key ASC",
        )?;
        let rows = stmt
            .query_map([user_id.as_str()], |row| {
                Ok((
                    row.get::<_, u8>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(code, key, value)| {
                Category::from_code(code)
                    .and_then(|category| Alias::new(user_id.clone(), category, key, value))
                    .map_err(|source| DbError::InvalidRow {
                        table: "aliases",
                        source,
                    })
            })
            .collect()
    }

    fn language_mappings_by_user(&self, user_id: &UserId) -> Result<Vec<LanguageMapping>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT extension, language FROM language_mappings
             WHERE user_id = ? ORDER BY extension ASC",
        )?;
        let rows = stmt
            .query_map([user_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(extension, language)| {
                LanguageMapping::new(user_id.clone(), extension, language).map_err(|source| {
                    DbError::InvalidRow {
                        table: "language_mappings",
                        source,
                    }
                })
            })
            .collect()
    }

    fn add_alias(&self, alias: &Alias) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO aliases (user_id, category, key, value) VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id, category, key) DO UPDATE SET value = excluded.value",
            params![
                alias.user_id.as_str(),
                alias.category.code(),
                alias.key,
                alias.value
            ],
        )?;
        Ok(())
    }

    fn add_language_mapping(&self, mapping: &LanguageMapping) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO language_mappings (user_id, extension, language) VALUES (?, ?, ?)
             ON CONFLICT (user_id, extension) DO UPDATE SET language = excluded.language",
            params![
                mapping.user_id.as_str(),
                mapping.extension,
                mapping.language
            ],
        )?;
        Ok(())
    }
}
