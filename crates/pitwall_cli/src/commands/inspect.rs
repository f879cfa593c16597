//! Inspect command implementation.

use super::{format_size, require_store, CliResult};
use pitwall_core::{Database, StoreConfig};
use pitwall_protocol::Timestamp;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Store identity.
    pub device_id: String,
    /// Server checkpoint.
    pub last_sync: Timestamp,
    /// Push watermark on the local clock.
    pub pushed_through: Timestamp,
    /// Frames in the journal.
    pub journal_frames: usize,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Live rows across all tables.
    pub live_rows: usize,
    /// Tombstones across all tables.
    pub tombstones: usize,
    /// Per-table counts, parents first.
    pub tables: Vec<TableStats>,
}

/// Row counts of one table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name as used on the wire.
    pub table: String,
    /// Live rows.
    pub live: usize,
    /// Tombstones.
    pub tombstones: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let result = collect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Opens the store at `path` and gathers its statistics.
pub fn collect(path: &Path) -> CliResult<InspectResult> {
    require_store(path)?;
    let db = Database::open(path, StoreConfig::server())?;
    let stats = db.stats();

    let tables: Vec<TableStats> = stats
        .tables
        .iter()
        .map(|(name, count)| TableStats {
            table: name.to_string(),
            live: count.live,
            tombstones: count.tombstones,
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        device_id: stats.device_id.to_string(),
        last_sync: stats.last_sync,
        pushed_through: stats.pushed_through,
        journal_frames: stats.journal_frames,
        journal_bytes: stats.journal_bytes,
        live_rows: tables.iter().map(|t| t.live).sum(),
        tombstones: tables.iter().map(|t| t.tombstones).sum(),
        tables,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Pitwall Store Inspection");
    println!("========================");
    println!();
    println!("Path:   {}", result.path);
    println!("Device: {}", result.device_id);
    println!();
    println!("Sync:");
    println!("  Checkpoint:     {}", result.last_sync);
    println!("  Pushed through: {}", result.pushed_through);
    println!();
    println!("Journal:");
    println!("  Frames: {}", result.journal_frames);
    println!("  Size:   {}", format_size(result.journal_bytes));
    println!();
    println!("Tables:");
    for table in &result.tables {
        println!(
            "  {:<16} {:>6} live, {:>4} tombstones",
            table.table, table.live, table.tombstones
        );
    }
    println!();
    println!("Total: {} live rows, {} tombstones", result.live_rows, result.tombstones);
}
