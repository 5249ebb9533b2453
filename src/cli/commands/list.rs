//! List command - show stored artifacts

use super::open_store;
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::error::DepotResult;
use crate::store::{IndexedDescriptor, PROP_DOWNLOAD_SIZE, PROP_SHA256};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
struct ListEntry<'a> {
    key: String,
    format: &'a str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<&'a str>,
    added_at: String,
}

impl<'a> From<&'a IndexedDescriptor> for ListEntry<'a> {
    fn from(entry: &'a IndexedDescriptor) -> Self {
        Self {
            key: entry.descriptor.key.to_string(),
            format: entry.descriptor.format.as_str(),
            path: entry.path.display().to_string(),
            size: entry
                .descriptor
                .property(PROP_DOWNLOAD_SIZE)
                .and_then(|s| s.parse().ok()),
            sha256: entry.descriptor.property(PROP_SHA256),
            added_at: entry.added_at.to_rfc3339(),
        }
    }
}

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> DepotResult<()> {
    let store = open_store(config)?;
    let entries = store.entries();

    if entries.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No artifacts in store");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&entries),
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Plain => print_plain(&entries),
    }

    Ok(())
}

fn print_table(entries: &[IndexedDescriptor]) {
    println!(
        "{:<48} {:<10} {:>10} {:<16}",
        style("KEY").bold(),
        style("FORMAT").bold(),
        style("SIZE").bold(),
        style("ADDED").bold()
    );
    println!("{}", "-".repeat(87));

    for entry in entries {
        let row = ListEntry::from(entry);
        let format = if entry.descriptor.is_canonical() {
            style(row.format).green()
        } else {
            style(row.format).dim()
        };
        let size = row.size.map_or_else(|| "-".to_string(), human_size);
        let added = entry.added_at.format("%Y-%m-%d %H:%M").to_string();

        println!("{:<48} {:<10} {:>10} {:<16}", row.key, format, size, added);
    }

    println!();
    println!("{} artifact file(s)", entries.len());
}

fn print_json(entries: &[IndexedDescriptor]) -> DepotResult<()> {
    let rows: Vec<ListEntry<'_>> = entries.iter().map(ListEntry::from).collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn print_plain(entries: &[IndexedDescriptor]) {
    for entry in entries {
        println!("{}", entry.descriptor);
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
