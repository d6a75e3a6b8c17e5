//! Summary command: time per project, language, editor, OS and machine.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::Utc;
use tally_core::{Category, Filters, Summary, format_timestamp};
use tally_db::Database;
use tally_engine::Engine;

use super::util::{format_duration, parse_datetime};
use crate::SummaryArgs;

pub async fn run<W: Write>(writer: &mut W, engine: &Engine<Database>, args: &SummaryArgs) -> Result<()> {
    let from = parse_datetime(&args.from)?;
    let to = match &args.to {
        Some(to) => parse_datetime(to)?,
        None => Utc::now(),
    };

    let summary = engine
        .get_summary(&args.user, from, to, filters(args))
        .await
        .context("failed to compute summary")?;

    if args.json {
        serde_json::to_writer_pretty(&mut *writer, summary.as_ref())?;
        writeln!(writer)?;
    } else {
        write_summary(writer, &summary)?;
    }
    Ok(())
}

/// Filters from the command line; `None` when no filter flag is given.
fn filters(args: &SummaryArgs) -> Option<Filters> {
    let flags = [
        (Category::Project, &args.project),
        (Category::Language, &args.language),
        (Category::Editor, &args.editor),
        (Category::OperatingSystem, &args.os),
        (Category::Machine, &args.machine),
    ];
    let filters = flags
        .into_iter()
        .filter_map(|(category, value)| value.as_ref().map(|value| (category, value)))
        .fold(Filters::default(), |filters, (category, value)| {
            filters.with(category, value.clone())
        });
    (!filters.is_empty()).then_some(filters)
}

const fn heading(category: Category) -> &'static str {
    match category {
        Category::Project => "PROJECTS",
        Category::Language => "LANGUAGES",
        Category::Editor => "EDITORS",
        Category::OperatingSystem => "OPERATING SYSTEMS",
        Category::Machine => "MACHINES",
    }
}

/// `part` as a percentage of `whole`, rounded to one decimal.
fn share(part: i64, whole: i64) -> String {
    if whole <= 0 {
        return String::new();
    }
    let tenths = (part * 1000 + whole / 2) / whole;
    format!("{}.{}%", tenths / 10, tenths % 10)
}

pub fn write_summary<W: Write>(writer: &mut W, summary: &Summary) -> std::io::Result<()> {
    writeln!(writer, "Summary for {}", summary.user_id)?;
    writeln!(
        writer,
        "{} to {}",
        format_timestamp(summary.from),
        format_timestamp(summary.to)
    )?;
    writeln!(writer)?;

    if summary.is_empty() {
        writeln!(writer, "No activity recorded.")?;
        return Ok(());
    }

    writeln!(writer, "Total: {}", format_duration(summary.total_secs))?;
    for category in Category::ALL {
        let items = summary.items(category);
        if items.is_empty() {
            continue;
        }
        let category_total = summary.total_time_by(category).num_seconds();
        writeln!(writer)?;
        writeln!(writer, "{}", heading(category))?;
        for item in items {
            writeln!(
                writer,
                "  {:<30}{:>8}{:>8}",
                item.key,
                format_duration(item.total_secs),
                share(item.total_secs, category_total)
            )?;
        }
    }
    Ok(())
}
