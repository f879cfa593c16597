//! Verify command implementation.

use super::{require_store, CliResult};
use pitwall_core::{audit, Database, StoreConfig, Violation};
use std::path::Path;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Journal frames replayed.
    pub frames: usize,
    /// Live rows checked.
    pub live_rows: usize,
    /// Broken invariants found.
    pub violations: Vec<Violation>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying store at {}", path.display());
    println!();

    let result = check(path)?;
    println!(
        "  Journal frames replayed: {}, live rows: {}",
        result.frames, result.live_rows
    );
    for violation in &result.violations {
        println!("    ERROR: {violation}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err(format!("{} invariant violations", result.violations.len()).into())
    }
}

/// Replays the journal at `path` and audits the resulting tables.
///
/// A torn journal tail is truncated while opening; an undecodable intact
/// frame fails here with `JournalCorruption`.
pub fn check(path: &Path) -> CliResult<VerifyResult> {
    require_store(path)?;
    let db = Database::open(path, StoreConfig::server())?;
    let stats = db.stats();
    Ok(VerifyResult {
        frames: stats.journal_frames,
        live_rows: stats.tables.iter().map(|(_, count)| count.live).sum(),
        violations: db.read(audit),
    })
}
