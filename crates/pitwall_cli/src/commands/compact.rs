//! Compact command implementation.

use super::{format_size, require_store, CliResult};
use pitwall_core::{Database, StoreConfig};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> CliResult<()> {
    require_store(path)?;
    let db = Database::open(path, StoreConfig::server())?;
    let before = db.stats();

    println!("Compacting store at {}", path.display());
    println!(
        "  Before: {} frames, {}",
        before.journal_frames,
        format_size(before.journal_bytes)
    );

    if dry_run {
        println!("  Dry run - journal left as is");
        return Ok(());
    }

    db.compact()?;
    let after = db.stats();
    println!(
        "  After:  {} frames, {}",
        after.journal_frames,
        format_size(after.journal_bytes)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_core::Roster;
    use pitwall_protocol::Team;
    use std::sync::Arc;

    fn seeded_store(path: &Path) -> pitwall_protocol::TeamId {
        let db = Arc::new(Database::open(path, StoreConfig::server()).unwrap());
        let roster = Roster::new(db);
        for name in ["Falcons", "Hawks", "Owls"] {
            roster.create_team(name).unwrap();
        }
        roster.create_team("Kites").unwrap().key
    }

    #[test]
    fn compaction_leaves_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let team = seeded_store(dir.path());

        run(dir.path(), false).unwrap();

        let db = Database::open(dir.path(), StoreConfig::server()).unwrap();
        assert_eq!(db.stats().journal_frames, 1);
        assert_eq!(db.get::<Team>(&team).unwrap().body().unwrap().name, "Kites");
    }

    #[test]
    fn dry_run_keeps_journal() {
        let dir = tempfile::tempdir().unwrap();
        seeded_store(dir.path());
        let frames = Database::open(dir.path(), StoreConfig::server())
            .unwrap()
            .stats()
            .journal_frames;

        run(dir.path(), true).unwrap();

        let db = Database::open(dir.path(), StoreConfig::server()).unwrap();
        assert_eq!(db.stats().journal_frames, frames);
    }
}
