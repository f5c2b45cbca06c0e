//! Atomic motion-program output.
//!
//! The rewritten program replaces the input via a temporary file in the
//! same directory followed by a rename, so a crash or error mid-write
//! leaves the original untouched.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::Result;

/// Write `content` to `path` atomically.
///
/// The content is first written and flushed to `<path>.<pid>.tmp` in the
/// same directory (same filesystem, so the rename is atomic); the
/// temporary is removed on any failure.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = std::env::temp_dir().join(format!("arc-overhang-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let target = dir.join("out.gcode");

        fs::write(&target, "old").unwrap();
        write_atomic(&target, "new content\n").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new content\n");

        // No temporary left behind.
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }
}
