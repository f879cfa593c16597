//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod serve;
pub mod sync;
pub mod verify;

use std::error::Error;
use std::path::Path;

/// Result type shared by the commands.
pub type CliResult<T> = Result<T, Box<dyn Error>>;

/// Fails unless `path` holds an existing store directory.
pub fn require_store(path: &Path) -> CliResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(format!("No store found at {}", path.display()).into())
    }
}

/// Renders a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pick_a_unit() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn missing_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(require_store(dir.path()).is_ok());
        let err = require_store(&dir.path().join("nope")).unwrap_err();
        assert!(err.to_string().starts_with("No store found"));
    }
}
