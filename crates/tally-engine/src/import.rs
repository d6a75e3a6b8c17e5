//! Bulk import of historical heartbeats from external sources.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::{
    HeartbeatIter, HeartbeatSource, HeartbeatStore, RawHeartbeat, UserId, ValidationError,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::EngineStore;
use crate::aggregation::Aggregator;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ingest::infer_languages;

/// Outcome of one import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub origin: String,
    /// Resume point: the latest heartbeat of this origin before the import.
    pub after: Option<DateTime<Utc>>,
    /// Heartbeats read from the source.
    pub received: usize,
    /// Heartbeats newly stored.
    pub inserted: usize,
    /// Source items that could not be read.
    pub rejected: usize,
    /// Days summarised by the regeneration that follows an import.
    pub regenerated_days: usize,
}

/// Errors reading a JSON-lines file.
#[derive(Debug, Error)]
pub enum JsonLinesError {
    #[error("failed to read heartbeats: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: {source}")]
    Invalid {
        line: usize,
        #[source]
        source: ValidationError,
    },
}

/// Reads one JSON heartbeat per line.
///
/// Every heartbeat is attributed to the importing user, whatever user the
/// line names. Blank lines are skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    origin: String,
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open(path: &Path, origin: impl Into<String>) -> Result<Self, JsonLinesError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), origin))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R, origin: impl Into<String>) -> Self {
        Self {
            reader,
            origin: origin.into(),
        }
    }
}

impl<R: BufRead> HeartbeatSource for JsonLinesSource<R> {
    type Error = JsonLinesError;

    fn origin(&self) -> &str {
        &self.origin
    }

    fn heartbeats<'a>(
        &'a mut self,
        user_id: &UserId,
        after: Option<DateTime<Utc>>,
    ) -> Result<HeartbeatIter<'a, Self::Error>, Self::Error> {
        let user_id = user_id.clone();
        let lines = (&mut self.reader).lines().enumerate();
        Ok(Box::new(lines.filter_map(move |(index, line)| {
            let line_no = index + 1;
            let line = match line {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            if line.trim().is_empty() {
                return None;
            }
            let mut raw: RawHeartbeat = match serde_json::from_str(&line) {
                Ok(raw) => raw,
                Err(source) => {
                    return Some(Err(JsonLinesError::Parse {
                        line: line_no,
                        source,
                    }));
                }
            };
            raw.user = None;
            match raw.validate(Some(&user_id)) {
                Ok(heartbeat) if after.is_some_and(|after| heartbeat.time <= after) => None,
                Ok(heartbeat) => Some(Ok(heartbeat)),
                Err(source) => Some(Err(JsonLinesError::Invalid {
                    line: line_no,
                    source,
                })),
            }
        })))
    }
}

/// Streams a source into the store in batches, then regenerates the user.
pub(crate) fn import<S, H>(
    store: &S,
    config: &EngineConfig,
    aggregator: &Aggregator<S>,
    source: &mut H,
    user_id: &UserId,
) -> Result<ImportReport, EngineError>
where
    S: EngineStore,
    H: HeartbeatSource,
{
    let origin = source.origin().to_string();
    let after = store
        .latest_by_origin(user_id, &origin)
        .map_err(EngineError::store)?;
    info!(user = %user_id, origin = %origin, after = ?after, "starting import");

    let mut report = ImportReport {
        origin: origin.clone(),
        after,
        ..ImportReport::default()
    };
    let batch_size = config.import_batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);

    let items = source
        .heartbeats(user_id, after)
        .map_err(EngineError::import_source)?;
    for item in items {
        match item {
            Ok(mut heartbeat) => {
                heartbeat.origin.clone_from(&origin);
                batch.push(heartbeat);
                report.received += 1;
            }
            Err(err) => {
                report.rejected += 1;
                warn!(user = %user_id, error = %err, "skipped unreadable heartbeat");
            }
        }
        if batch.len() >= batch_size {
            report.inserted += flush(store, config, &mut batch)?;
        }
    }
    report.inserted += flush(store, config, &mut batch)?;

    report.regenerated_days = aggregator.regenerate(user_id, Utc::now())?;
    info!(
        user = %user_id,
        received = report.received,
        inserted = report.inserted,
        rejected = report.rejected,
        "import finished"
    );
    Ok(report)
}

fn flush<S: EngineStore>(
    store: &S,
    config: &EngineConfig,
    batch: &mut Vec<tally_core::Heartbeat>,
) -> Result<usize, EngineError> {
    if batch.is_empty() {
        return Ok(0);
    }
    infer_languages(store, config, batch)?;
    let inserted = store.insert_batch(batch).map_err(EngineError::store)?;
    batch.clear();
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn user() -> UserId {
        UserId::new("ferris").unwrap()
    }

    const LINES: &str = r#"{"entity":"a.rs","time":1736931600.0,"project":"tally","user":"mallory"}

{"entity":"b.rs","time":"2025-01-15T09:01:00Z"}
not json
{"entity":"","time":1736931720.0}
"#;

    #[test]
    fn json_lines_source_yields_and_reports_per_line() {
        let mut source = JsonLinesSource::new(Cursor::new(LINES), "wakatime");
        let items: Vec<_> = source.heartbeats(&user(), None).unwrap().collect();

        assert_eq!(items.len(), 4);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.user_id, user());
        assert_eq!(first.project, "tally");
        assert!(items[1].is_ok());
        assert!(matches!(items[2], Err(JsonLinesError::Parse { line: 4, .. })));
        assert!(matches!(items[3], Err(JsonLinesError::Invalid { line: 5, .. })));
    }

    #[test]
    fn json_lines_source_resumes_after_time() {
        let mut source = JsonLinesSource::new(Cursor::new(LINES), "wakatime");
        let after = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
        let items: Vec<_> = source
            .heartbeats(&user(), Some(after))
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity, "b.rs");
    }
}
